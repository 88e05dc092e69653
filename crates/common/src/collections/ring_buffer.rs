//! Fixed-capacity circular buffer used for bounded sample windows.
//!
//! A [`RingBuffer`] keeps items in insertion order and never grows past the
//! capacity chosen at construction. Pushing into a full buffer evicts the
//! oldest item and hands it back to the caller, which lets windowed counters
//! (success/failure tallies, latency sums) stay exact in O(1) without
//! rescanning the window.
//!
//! # Complexity
//! - `push`, `len`, `is_full` and `clear` are O(1).
//! - `to_vec` is O(n).
//!
//! # Thread Safety
//! - `RingBuffer<T>` has no interior mutability. Owners wrap it in their own
//!   lock when it is shared.

use std::collections::VecDeque;

/// A fixed-capacity first-in-first-out buffer that overwrites its oldest
/// element when full.
///
/// ```rust
/// use rampart_common::collections::RingBuffer;
///
/// let mut window = RingBuffer::new(3);
/// assert_eq!(window.push(1), None);
/// window.push(2);
/// window.push(3);
/// assert_eq!(window.push(4), Some(1));
///
/// assert_eq!(window.to_vec(), vec![2, 3, 4]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Creates a new buffer. A capacity of zero is clamped to `1`.
    #[inline]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { buf: VecDeque::with_capacity(capacity), capacity }
    }

    /// Appends an item, returning the evicted oldest item when the buffer
    /// was already full.
    #[inline]
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.is_full() { self.buf.pop_front() } else { None };
        self.buf.push_back(item);
        evicted
    }

    /// Number of items currently stored.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` when the buffer has no items.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns `true` when the next push will evict.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.capacity
    }

    /// Maximum number of items retained.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Removes all elements, keeping the capacity.
    #[inline]
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Iterates from oldest to newest.
    #[inline]
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.buf.iter()
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copies the contents, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.buf.iter().cloned().collect()
    }
}
