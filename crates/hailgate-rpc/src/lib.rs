// crates/hailgate-rpc/src/lib.rs
//
// hailgate-rpc: tonic-based greeting RPC server with per-connection call
// admission.
//
// Serves a single `greeter/say_hello` operation as JSON-RPC over tonic's
// server infrastructure (no proto codegen). Every accepted TCP connection
// is tracked for its lifetime, and an interceptor counts the calls on each
// connection, rejecting with PERMISSION_DENIED once the configured
// threshold is exceeded.

pub mod handlers;
pub mod middleware;
pub mod server;
pub mod transport;

// Re-export the main server types for ergonomic access.
pub use server::GreeterRpcServer;
pub use server::RpcConfig;
pub use server::RpcError;
pub use server::ServerHandle;
