// crates/hailgate-rpc/src/server.rs
//
// RPC server setup: GreeterRpcServer, RpcConfig, and the tonic wiring.
//
// Uses a JSON-RPC-over-gRPC approach: a single tonic unary service accepts
// JSON-encoded requests with a method field, dispatches to the appropriate
// handler, and returns JSON-encoded responses. This avoids proto codegen
// while still using tonic's server infrastructure for transport and
// middleware. The admission interceptor and the tracked transport are
// installed here; the server also accepts HTTP/1.1 so plain HTTP clients
// can reach the JSON endpoint.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http_body::Body as HttpBody;
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tonic::transport::Server;
use tonic::Status;

use hailgate_core::{ConnectionRegistry, DEFAULT_CALL_THRESHOLD};

use crate::handlers;
use crate::middleware::AdmissionInterceptor;
use crate::transport::{TrackedIncoming, TransportTracker};

// ---------------------------------------------------------------------------
// RpcConfig
// ---------------------------------------------------------------------------

/// Configuration for the RPC server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Host to bind to (e.g., "127.0.0.1" or "0.0.0.0").
    pub host: String,
    /// Port to listen on. Port 0 binds an ephemeral port.
    pub port: u16,
    /// Calls admitted per connection before rejection.
    pub call_threshold: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 50051,
            call_threshold: DEFAULT_CALL_THRESHOLD,
        }
    }
}

// ---------------------------------------------------------------------------
// RpcError
// ---------------------------------------------------------------------------

/// Errors from server startup and serving.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The configured host/port did not parse to a socket address.
    #[error("invalid listen address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),

    /// Binding the listen socket failed (port in use, permission, ...).
    #[error("failed to bind listen socket: {0}")]
    Bind(#[source] std::io::Error),

    /// The tonic transport failed while serving.
    #[error("transport error: {0}")]
    Serve(#[from] tonic::transport::Error),
}

// ---------------------------------------------------------------------------
// JSON-RPC Envelope
// ---------------------------------------------------------------------------

/// A JSON-RPC-style request envelope: a method name plus a JSON params
/// payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// The RPC method to invoke (e.g., "greeter/say_hello").
    pub method: String,
    /// JSON-encoded parameters for the method.
    pub params: serde_json::Value,
}

/// A JSON-RPC-style response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Whether the request succeeded.
    pub success: bool,
    /// The result data (if success).
    pub result: Option<serde_json::Value>,
    /// Error message (if not success).
    pub error: Option<String>,
}

impl JsonRpcResponse {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
        }
    }
}

// ---------------------------------------------------------------------------
// GreeterRpcServer
// ---------------------------------------------------------------------------

/// Composition root for the RPC server.
///
/// Owns the connection registry and wires the tracked transport, the
/// admission interceptor, and the greeter service into tonic.
#[derive(Debug)]
pub struct GreeterRpcServer {
    config: RpcConfig,
    registry: Arc<ConnectionRegistry>,
}

impl GreeterRpcServer {
    pub fn new(config: RpcConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.call_threshold));
        Self { config, registry }
    }

    /// The shared connection registry (used by tests and diagnostics).
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Bind the listen socket and start serving in a background task.
    ///
    /// Binding happens before the task is spawned, so an unavailable port
    /// surfaces immediately as [`RpcError::Bind`]. The returned handle
    /// exposes the bound address and graceful shutdown.
    pub async fn start(&self) -> Result<ServerHandle, RpcError> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let listener = TcpListener::bind(addr).await.map_err(RpcError::Bind)?;
        let local_addr = listener.local_addr().map_err(RpcError::Bind)?;

        tracing::info!(
            "RPC server listening on {} (per-connection call threshold {})",
            local_addr,
            self.config.call_threshold
        );

        let tracker = TransportTracker::new(self.registry.clone());
        let incoming = TrackedIncoming::new(listener, tracker);
        let interceptor = AdmissionInterceptor::new(self.registry.clone());

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let shutdown = async move {
            // Resolves on stop(); also resolves if the handle is dropped.
            let _ = shutdown_rx.changed().await;
        };

        let task = tokio::spawn(
            Server::builder()
                .accept_http1(true)
                .add_service(tonic::service::interceptor::InterceptedService::new(
                    GreeterJsonRpcServer::new(GreeterServiceImpl),
                    interceptor,
                ))
                .serve_with_incoming_shutdown(incoming, shutdown),
        );

        Ok(ServerHandle {
            local_addr,
            shutdown: shutdown_tx,
            task: Mutex::new(Some(task)),
            stopped: AtomicBool::new(false),
        })
    }
}

/// Handle to a running RPC server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<Result<(), tonic::transport::Error>>>>,
    stopped: AtomicBool,
}

impl ServerHandle {
    /// The address the server is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Gracefully shut the server down.
    ///
    /// Stops accepting new connections, lets in-flight calls drain for up
    /// to `timeout`, then force-terminates whatever remains. Completes as
    /// soon as the drain finishes. Idempotent: the one-shot stopped flag
    /// makes a second or concurrent call a no-op, and a drain overrun is
    /// logged but never fails the shutdown sequence.
    pub async fn stop(&self, timeout: Duration) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);

        let task = self.task.lock().await.take();
        let Some(task) = task else {
            return;
        };
        let abort = task.abort_handle();

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!("RPC server drained and stopped");
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!("RPC server exited with transport error during shutdown: {}", e);
            }
            Ok(Err(e)) => {
                tracing::warn!("RPC server task failed during shutdown: {}", e);
            }
            Err(_) => {
                tracing::warn!(
                    "drain timeout of {:?} exceeded, force-closing remaining connections",
                    timeout
                );
                abort.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// gRPC Service Definition (manual, no proto codegen)
// ---------------------------------------------------------------------------

/// The internal service implementation that dispatches JSON-RPC calls to
/// the appropriate handler.
#[derive(Debug, Clone)]
struct GreeterServiceImpl;

impl GreeterServiceImpl {
    /// Dispatch a JSON-RPC request based on the method name. Unknown
    /// methods produce an error envelope, not a transport failure.
    async fn dispatch(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let result = match request.method.as_str() {
            "greeter/say_hello" => {
                dispatch_handler(request.params, handlers::greeter::handle_say_hello).await
            }
            _ => Err(format!("unknown method: {}", request.method)),
        };

        match result {
            Ok(value) => JsonRpcResponse {
                success: true,
                result: Some(value),
                error: None,
            },
            Err(err) => JsonRpcResponse::failure(err),
        }
    }
}

/// Generic dispatch helper: deserialize params into a request type, call
/// the handler, and serialize the result to JSON.
async fn dispatch_handler<Req, Resp, F, Fut>(
    params: serde_json::Value,
    handler: F,
) -> Result<serde_json::Value, String>
where
    Req: serde::de::DeserializeOwned,
    Resp: serde::Serialize,
    F: FnOnce(Req) -> Fut,
    Fut: std::future::Future<Output = Result<Resp, String>>,
{
    let request: Req =
        serde_json::from_value(params).map_err(|e| format!("failed to deserialize request: {}", e))?;
    let response = handler(request).await?;
    serde_json::to_value(response).map_err(|e| format!("failed to serialize response: {}", e))
}

/// The tonic service wrapper: accepts bytes, deserializes the JSON-RPC
/// envelope, and dispatches. Implementing the tower service by hand is the
/// pattern for defining tonic services without proto codegen.
#[derive(Debug, Clone)]
pub struct GreeterJsonRpcServer {
    inner: GreeterServiceImpl,
}

impl GreeterJsonRpcServer {
    fn new(inner: GreeterServiceImpl) -> Self {
        Self { inner }
    }
}

impl tonic::server::NamedService for GreeterJsonRpcServer {
    const NAME: &'static str = "hailgate.rpc.GreeterService";
}

impl<B> tower_service::Service<http::Request<B>> for GreeterJsonRpcServer
where
    B: HttpBody + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
    B::Data: Send,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let inner = self.inner.clone();

        Box::pin(async move {
            let body_bytes = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    let e = e.into();
                    tracing::error!("failed to read request body: {}", e);
                    let resp =
                        JsonRpcResponse::failure(format!("failed to read request body: {}", e));
                    return Ok(json_response(&resp));
                }
            };

            let rpc_request: JsonRpcRequest = match serde_json::from_slice(&body_bytes) {
                Ok(r) => r,
                Err(e) => {
                    let resp = JsonRpcResponse::failure(format!("invalid request envelope: {}", e));
                    return Ok(json_response(&resp));
                }
            };

            let rpc_response = inner.dispatch(rpc_request).await;
            Ok(json_response(&rpc_response))
        })
    }
}

/// Build an HTTP response carrying the JSON-encoded envelope.
fn json_response(response: &JsonRpcResponse) -> http::Response<tonic::body::BoxBody> {
    let json = serde_json::to_vec(response).unwrap_or_default();
    let body = tonic::body::BoxBody::new(
        http_body_util::Full::new(bytes::Bytes::from(json))
            .map_err(|e| Status::internal(format!("body error: {}", e))),
    );

    http::Response::builder()
        .status(200)
        .header("content-type", "application/json")
        .body(body)
        .unwrap()
}
