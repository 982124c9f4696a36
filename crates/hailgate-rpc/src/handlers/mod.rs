// crates/hailgate-rpc/src/handlers/mod.rs
//
// Request handlers for the RPC methods, grouped by service area.

pub mod greeter;
