// crates/hailgate-core/src/registry.rs
//
// ConnectionRegistry: maps live connections to their admission state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::connection::{ConnectionId, ConnectionState};
use crate::error::AdmissionError;

/// The outcome of admitting one call on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Position of this call in the connection's call sequence (1-based).
    pub call_number: u64,
    /// Whether the call may proceed to the service handler.
    pub admitted: bool,
}

/// Registry of admission state for currently-open connections.
///
/// Entries correspond 1:1 to open connections: the transport layer
/// registers an entry on transport-ready and deregisters it on
/// transport-terminated. The map is guarded by a single lock with bounded
/// hold time; counter updates themselves are lock-free, so the admission
/// hot path never blocks on the registry beyond a `HashMap` lookup.
#[derive(Debug)]
pub struct ConnectionRegistry {
    threshold: u64,
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionState>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry. `threshold` is the number of calls
    /// admitted per connection before rejection.
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a fresh zero-count state for `id`.
    ///
    /// If an entry already exists for the id (a misbehaving transport
    /// sending duplicate ready notifications), the previous entry is
    /// overwritten and discarded without error.
    pub fn register(&self, id: ConnectionId) -> Arc<ConnectionState> {
        let state = Arc::new(ConnectionState::new(self.threshold));
        self.write_connections().insert(id, state.clone());
        state
    }

    /// Remove the entry for `id`, if present.
    ///
    /// Removing an absent entry is a silent no-op, which tolerates
    /// duplicate or out-of-order terminated notifications. In-flight
    /// admission checks hold their own `Arc` to the state, so removal
    /// only affects subsequent lookups.
    pub fn deregister(&self, id: ConnectionId) {
        self.write_connections().remove(&id);
    }

    /// Look up the state for `id`. Returns `None` once the connection
    /// has been torn down.
    pub fn lookup(&self, id: ConnectionId) -> Option<Arc<ConnectionState>> {
        self.read_connections().get(&id).cloned()
    }

    /// Count one call on `id` and decide whether it is admitted.
    pub fn admit(&self, id: ConnectionId) -> Result<Admission, AdmissionError> {
        let state = self
            .lookup(id)
            .ok_or(AdmissionError::NotRegistered(id))?;
        let (call_number, admitted) = state.increment_and_check();
        Ok(Admission {
            call_number,
            admitted,
        })
    }

    /// Number of currently-registered connections.
    pub fn len(&self) -> usize {
        self.read_connections().len()
    }

    /// Whether no connections are currently registered.
    pub fn is_empty(&self) -> bool {
        self.read_connections().is_empty()
    }

    /// The configured per-connection call threshold.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    fn read_connections(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, Arc<ConnectionState>>> {
        self.connections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_connections(
        &self,
    ) -> RwLockWriteGuard<'_, HashMap<ConnectionId, Arc<ConnectionState>>> {
        self.connections.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_lookup_deregister() {
        let registry = ConnectionRegistry::new(5);
        let id = ConnectionId::from_raw(1);

        assert!(registry.lookup(id).is_none());

        registry.register(id);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(id).is_some());

        registry.deregister(id);
        assert!(registry.lookup(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_deregister_absent_is_noop() {
        let registry = ConnectionRegistry::new(5);
        registry.deregister(ConnectionId::from_raw(99));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_register_discards_previous_state() {
        let registry = ConnectionRegistry::new(5);
        let id = ConnectionId::from_raw(7);

        registry.register(id);
        assert!(registry.admit(id).unwrap().admitted);
        assert_eq!(registry.lookup(id).unwrap().call_count(), 1);

        // A second ready notification replaces the entry with a fresh
        // zero-count state rather than erroring.
        registry.register(id);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup(id).unwrap().call_count(), 0);
    }

    #[test]
    fn test_admit_counts_to_threshold_then_rejects() {
        let registry = ConnectionRegistry::new(2);
        let id = ConnectionId::from_raw(3);
        registry.register(id);

        let first = registry.admit(id).unwrap();
        assert_eq!(first, Admission { call_number: 1, admitted: true });
        let second = registry.admit(id).unwrap();
        assert_eq!(second, Admission { call_number: 2, admitted: true });
        let third = registry.admit(id).unwrap();
        assert_eq!(third, Admission { call_number: 3, admitted: false });
    }

    #[test]
    fn test_admit_unregistered_connection() {
        let registry = ConnectionRegistry::new(5);
        let id = ConnectionId::from_raw(11);
        assert_eq!(registry.admit(id), Err(AdmissionError::NotRegistered(id)));
    }

    #[test]
    fn test_thresholds_are_per_connection() {
        let registry = ConnectionRegistry::new(5);
        let a = ConnectionId::from_raw(1);
        let b = ConnectionId::from_raw(2);
        registry.register(a);
        registry.register(b);

        for _ in 0..5 {
            assert!(registry.admit(a).unwrap().admitted);
            assert!(registry.admit(b).unwrap().admitted);
        }
        assert!(!registry.admit(a).unwrap().admitted);
        assert!(!registry.admit(b).unwrap().admitted);
    }

    #[test]
    fn test_deregister_does_not_disturb_inflight_state() {
        let registry = ConnectionRegistry::new(5);
        let id = ConnectionId::from_raw(4);
        registry.register(id);

        // An in-flight handler holds its own Arc to the state.
        let state = registry.lookup(id).unwrap();
        registry.deregister(id);

        let (count, admitted) = state.increment_and_check();
        assert_eq!(count, 1);
        assert!(admitted);

        // Subsequent lookups see nothing.
        assert!(registry.lookup(id).is_none());
        assert_eq!(registry.admit(id), Err(AdmissionError::NotRegistered(id)));
    }

    #[test]
    fn test_concurrent_admits_on_one_connection() {
        let registry = std::sync::Arc::new(ConnectionRegistry::new(5));
        let id = ConnectionId::from_raw(8);
        registry.register(id);

        let threads = 16;
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.admit(id).unwrap().admitted as u64)
            })
            .collect();

        let admitted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 5);
        assert_eq!(registry.lookup(id).unwrap().call_count(), threads);
    }
}
