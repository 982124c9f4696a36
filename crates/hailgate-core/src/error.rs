// crates/hailgate-core/src/error.rs
//
// Error types for the admission domain.

use thiserror::Error;

use crate::connection::ConnectionId;

/// Errors surfaced by the admission decision.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// No state is registered for the connection. With a well-behaved
    /// transport this never happens at call time; callers treat it as an
    /// internal fault, not a user-facing condition.
    #[error("no registered state for connection {0}")]
    NotRegistered(ConnectionId),
}
