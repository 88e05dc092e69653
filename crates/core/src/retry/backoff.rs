//! Capped exponential backoff with uniform jitter

use std::time::Duration;

use rand::Rng;

/// Delay calculator: `min(base * 2^attempt, max)` scaled by a uniform factor
/// in `[1 - jitter, 1 + jitter]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter_fraction: f64,
}

impl Backoff {
    /// Create a backoff. `jitter_fraction` is clamped to `[0, 1]`.
    #[must_use]
    pub fn new(base: Duration, max: Duration, jitter_fraction: f64) -> Self {
        let jitter_fraction =
            if jitter_fraction.is_finite() { jitter_fraction.clamp(0.0, 1.0) } else { 0.0 };
        Self { base, max, jitter_fraction }
    }

    /// Un-jittered delay before retry number `attempt` (0-based)
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Smallest and largest delay `attempt` can produce
    #[must_use]
    pub fn bounds(&self, attempt: u32) -> (Duration, Duration) {
        let delay = self.base_delay(attempt);
        (delay.mul_f64(1.0 - self.jitter_fraction), delay.mul_f64(1.0 + self.jitter_fraction))
    }

    /// Jittered delay using the supplied random source
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.base_delay(attempt);
        if self.jitter_fraction == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rng.gen_range(-self.jitter_fraction..=self.jitter_fraction);
        delay.mul_f64(1.0 + factor)
    }

    /// Jittered delay using the thread-local generator
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_exponential_growth_is_capped() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 0.0);

        assert_eq!(backoff.base_delay(0), Duration::from_millis(100));
        assert_eq!(backoff.base_delay(1), Duration::from_millis(200));
        assert_eq!(backoff.base_delay(3), Duration::from_millis(800));
        assert_eq!(backoff.base_delay(4), Duration::from_secs(1));
        assert_eq!(backoff.base_delay(40), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10), 0.5);
        let mut rng = StdRng::seed_from_u64(7);
        let (low, high) = backoff.bounds(2);
        assert_eq!(low, Duration::from_millis(200));
        assert_eq!(high, Duration::from_millis(600));

        let mut distinct = std::collections::HashSet::new();
        for _ in 0..200 {
            let delay = backoff.delay_with(2, &mut rng);
            assert!(delay >= low && delay <= high, "{delay:?} outside [{low:?}, {high:?}]");
            distinct.insert(delay.as_micros());
        }
        assert!(distinct.len() > 10);
    }

    #[test]
    fn test_jitter_fraction_is_clamped() {
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(1), 3.0);
        assert_eq!(backoff.bounds(0), (Duration::ZERO, Duration::from_millis(20)));

        let nan = Backoff::new(Duration::from_millis(10), Duration::from_secs(1), f64::NAN);
        assert_eq!(nan.bounds(0), (Duration::from_millis(10), Duration::from_millis(10)));
    }
}
