// crates/hailgate-core/src/lib.rs
//
// hailgate-core: connection-scoped call-admission domain for the Hailgate
// RPC server.
//
// Holds the per-connection call counter, the registry that maps live
// connections to their counters, and the admission decision itself. The
// transport and service layers live in hailgate-rpc; this crate performs
// no I/O and emits no logs.

pub mod connection;
pub mod error;
pub mod registry;

// Re-export the main types for ergonomic access.
pub use connection::{ConnectionId, ConnectionState, DEFAULT_CALL_THRESHOLD};
pub use error::AdmissionError;
pub use registry::{Admission, ConnectionRegistry};
