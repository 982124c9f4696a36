// crates/hailgate-rpc/src/middleware.rs
//
// Middleware for the RPC server: the per-connection call-admission
// interceptor.

use std::sync::Arc;

use tonic::service::Interceptor;
use tonic::{Request, Status};

use hailgate_core::{AdmissionError, ConnectionRegistry};

use crate::transport::ConnectionInfo;

/// Admission decision point for every call.
///
/// Runs before the service handler on each request: looks up the
/// connection's state via the [`ConnectionInfo`] the tracked transport
/// placed in the request extensions, counts the call, and either forwards
/// the request unchanged or terminates it with PERMISSION_DENIED.
///
/// Rejection is a single `Err(Status)` return, which tonic turns into
/// exactly one call termination; there is no close handle that could be
/// invoked twice. Log emission never influences the decision.
#[derive(Debug, Clone)]
pub struct AdmissionInterceptor {
    registry: Arc<ConnectionRegistry>,
}

impl AdmissionInterceptor {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

impl Interceptor for AdmissionInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        // Missing connect info means the request did not come through the
        // tracked transport. That is a wiring bug, not a client error.
        let info = match request.extensions().get::<ConnectionInfo>() {
            Some(info) => info.clone(),
            None => {
                tracing::error!("request carried no connection info; rejecting");
                return Err(Status::internal("connection metadata missing"));
            }
        };

        match self.registry.admit(info.id) {
            Ok(admission) if admission.admitted => {
                tracing::debug!(
                    "call {} admitted on {} (remote {:?})",
                    admission.call_number,
                    info.id,
                    info.remote_addr
                );
                Ok(request)
            }
            Ok(admission) => {
                tracing::info!(
                    "call {} rejected on {} (remote {:?}): per-connection limit of {} reached",
                    admission.call_number,
                    info.id,
                    info.remote_addr,
                    self.registry.threshold()
                );
                Err(Status::permission_denied("call limit exceeded for connection"))
            }
            Err(AdmissionError::NotRegistered(id)) => {
                // The transport registers state before any call can arrive,
                // so a miss here is a bug-level event.
                tracing::error!("no registered state for {}; rejecting call", id);
                Err(Status::internal("connection not registered"))
            }
        }
    }
}
