//! Thread-safe sequence counter for protocol message numbering.
//!
//! Every Rollcall frame carries a monotonically increasing sequence number
//! in its header. The handshake leans on it in two places:
//!
//! - **Duplicate detection** – a peer that resends a CommitRequest after a
//!   lost acknowledgement will see two CommitAcks; the sequence number lets
//!   it discard the stale one.
//! - **Queue-update ordering** – QueueUpdate frames can arrive close
//!   together while the queue drains; the sequence number says which
//!   position report is newest.
//!
//! One counter exists per connection. `AtomicU64` makes `next()` safe to
//! call from the read and write sides of a connection simultaneously
//! without a lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, monotonically increasing counter for protocol sequence
/// numbers.
///
/// Sequence numbers start at 0 and increment by 1 with each call to
/// [`next`](SequenceCounter::next). The counter wraps around at `u64::MAX`
/// back to 0 without panicking.
///
/// # Examples
///
/// ```rust
/// use rollcall_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    /// Creates a new counter starting at 0.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(0),
        }
    }

    /// Returns the next sequence number and atomically increments the counter.
    ///
    /// The first call returns 0, the second returns 1, and so on. Wraps
    /// around from `u64::MAX` to 0 on overflow without panicking.
    ///
    /// `Ordering::Relaxed` is sufficient: sequence numbers only order
    /// messages, they never synchronise memory between threads.
    pub fn next(&self) -> u64 {
        // fetch_add returns the value before the addition; u64 arithmetic
        // wraps naturally at the top of the range.
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the current value without incrementing.
    ///
    /// For logging and diagnostics only; another thread may advance the
    /// counter before the caller uses the returned value.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
