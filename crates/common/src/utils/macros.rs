//! Macros for reducing boilerplate code

/// Implements `as_str`, `Display` and `FromStr` for label enums
///
/// Labels are the stable snake_case names used in log fields, stats keys
/// and config documents. Parsing is case-insensitive, so the mapped
/// strings must be lowercase.
///
/// ```rust
/// use rampart_common::impl_label_conversions;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// pub enum Tier {
///     Primary,
///     ReadReplica,
/// }
///
/// impl_label_conversions!(Tier {
///     Primary => "primary",
///     ReadReplica => "read_replica",
/// });
///
/// assert_eq!(Tier::ReadReplica.as_str(), "read_replica");
/// assert_eq!("PRIMARY".parse::<Tier>(), Ok(Tier::Primary));
/// ```
#[macro_export]
macro_rules! impl_label_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Stable lowercase label for this variant
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    //! Unit tests for utils::macros.
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Lane {
        Fast,
        SlowPath,
    }

    impl_label_conversions!(Lane {
        Fast => "fast",
        SlowPath => "slow_path",
    });

    /// Validates display and parse for the label enum scenario.
    ///
    /// Assertions:
    /// - Confirms `Display` uses the mapped label.
    /// - Confirms parsing ignores case.
    #[test]
    fn test_label_roundtrip() {
        assert_eq!(Lane::SlowPath.to_string(), "slow_path");
        assert_eq!(Lane::from_str("SLOW_PATH"), Ok(Lane::SlowPath));
        assert_eq!(Lane::from_str("Fast"), Ok(Lane::Fast));
    }

    /// Validates `FromStr` rejection for the unknown label scenario.
    ///
    /// Assertions:
    /// - Ensures the error names the enum and the input.
    #[test]
    fn test_label_invalid() {
        let result = Lane::from_str("warp");
        assert_eq!(result, Err("Invalid Lane: warp".to_string()));
    }
}
