// crates/hailgate-core/src/connection.rs
//
// Per-connection identity and call counter.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of calls admitted per connection before rejection, unless
/// configured otherwise.
pub const DEFAULT_CALL_THRESHOLD: u64 = 5;

/// Opaque identity of a single transport connection.
///
/// Minted by the transport layer from a monotonic counter, so an id is
/// never reused within a process lifetime even if the remote address is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw counter value as a connection id.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw counter value behind this id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The call counter for one live connection.
///
/// Created on transport-ready with a count of zero and destroyed on
/// transport-terminated. The counter is only ever incremented, never
/// decremented or reset, for the lifetime of the connection. All updates
/// go through [`ConnectionState::increment_and_check`], which is safe to
/// invoke concurrently from multiple call handlers on the same
/// connection.
#[derive(Debug)]
pub struct ConnectionState {
    /// Calls admitted before rejection kicks in.
    threshold: u64,
    /// Total calls seen on this connection so far.
    calls: AtomicU64,
}

impl ConnectionState {
    /// Create a fresh state with a zero call count.
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            calls: AtomicU64::new(0),
        }
    }

    /// Atomically count one more call and decide whether it is admitted.
    ///
    /// Returns the new total and `true` while the total is within the
    /// threshold: the first N calls on a connection are admitted, call
    /// N+1 and beyond are rejected. Concurrent invocations never lose or
    /// double-count an increment. Performs no I/O and cannot fail.
    pub fn increment_and_check(&self) -> (u64, bool) {
        let new_count = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        (new_count, new_count <= self.threshold)
    }

    /// Total calls counted so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// The configured admission threshold.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_n_admitted_then_rejected() {
        let state = ConnectionState::new(5);

        for expected in 1..=5 {
            let (count, admitted) = state.increment_and_check();
            assert_eq!(count, expected);
            assert!(admitted, "call {} should be admitted", expected);
        }

        let (count, admitted) = state.increment_and_check();
        assert_eq!(count, 6);
        assert!(!admitted, "call 6 should be rejected");

        let (count, admitted) = state.increment_and_check();
        assert_eq!(count, 7);
        assert!(!admitted, "call 7 should be rejected");
    }

    #[test]
    fn test_zero_threshold_rejects_everything() {
        let state = ConnectionState::new(0);
        let (count, admitted) = state.increment_and_check();
        assert_eq!(count, 1);
        assert!(!admitted);
    }

    #[test]
    fn test_concurrent_increments_lose_nothing() {
        let threshold = 5u64;
        let threads = 8u64;
        let calls_per_thread = 100u64;
        let state = Arc::new(ConnectionState::new(threshold));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || {
                    let mut admitted = 0u64;
                    for _ in 0..calls_per_thread {
                        let (_, ok) = state.increment_and_check();
                        if ok {
                            admitted += 1;
                        }
                    }
                    admitted
                })
            })
            .collect();

        let admitted_total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // Exactly `threshold` calls win an admitted slot; every increment
        // is observed exactly once.
        assert_eq!(admitted_total, threshold);
        assert_eq!(state.call_count(), threads * calls_per_thread);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::from_raw(42);
        assert_eq!(id.to_string(), "conn-42");
        assert_eq!(id.as_u64(), 42);
    }
}
