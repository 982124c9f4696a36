// crates/hailgate-rpc/src/transport.rs
//
// Transport lifecycle tracking: every accepted TCP connection gets an id
// and a registry entry for its lifetime.
//
// TrackedIncoming accepts connections and wraps each stream in a
// TrackedStream whose Drop deregisters the connection, so registry entries
// follow the socket's actual end of life (including abrupt disconnects).
// The connection id and remote address travel to the interceptor through
// tonic's connect-info extension.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Sleep;
use tokio_stream::Stream;
use tonic::transport::server::Connected;

use hailgate_core::{ConnectionId, ConnectionRegistry};

/// Connection metadata published into every request's extensions.
///
/// This is the `Connected::ConnectInfo` for tracked streams; tonic clones
/// it into each request served on the connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Registry identity of the connection.
    pub id: ConnectionId,
    /// Remote peer address, when known.
    pub remote_addr: Option<SocketAddr>,
}

/// Keeps the connection registry consistent with transport lifecycle.
#[derive(Debug)]
pub struct TransportTracker {
    registry: Arc<ConnectionRegistry>,
    next_id: AtomicU64,
}

impl TransportTracker {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            next_id: AtomicU64::new(1),
        }
    }

    /// Record a newly established connection: mint an id and register a
    /// fresh zero-count state for it.
    pub fn on_transport_ready(&self, remote_addr: Option<SocketAddr>) -> ConnectionInfo {
        let id = ConnectionId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry.register(id);
        match remote_addr {
            Some(addr) => tracing::info!("transport ready: {} (remote {})", id, addr),
            None => tracing::info!("transport ready: {}", id),
        }
        ConnectionInfo { id, remote_addr }
    }

    /// Record a terminated connection and discard its state. Duplicate or
    /// out-of-order notifications are harmless (registry removal of an
    /// absent entry is a no-op).
    pub fn on_transport_terminated(&self, info: &ConnectionInfo) {
        self.registry.deregister(info.id);
        tracing::info!("transport terminated: {}", info.id);
    }
}

/// An accepted TCP stream carrying its connection metadata.
///
/// Deregisters the connection from the registry when dropped, which is
/// when the serving side is finished with the socket.
#[derive(Debug)]
pub struct TrackedStream {
    inner: TcpStream,
    info: ConnectionInfo,
    tracker: Arc<TransportTracker>,
}

impl TrackedStream {
    fn new(inner: TcpStream, info: ConnectionInfo, tracker: Arc<TransportTracker>) -> Self {
        Self {
            inner,
            info,
            tracker,
        }
    }
}

impl Connected for TrackedStream {
    type ConnectInfo = ConnectionInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        self.info.clone()
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.tracker.on_transport_terminated(&self.info);
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

/// Pause after a failed accept before retrying, so persistent errors
/// (e.g. fd exhaustion) do not busy-spin the runtime.
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(500);

/// Accept loop feeding tonic's `serve_with_incoming`: yields tracked
/// streams and registers each connection before it is served.
#[derive(Debug)]
pub struct TrackedIncoming {
    listener: TcpListener,
    tracker: Arc<TransportTracker>,
    /// Backoff timer armed after an accept error.
    error_sleep: Option<Pin<Box<Sleep>>>,
}

impl TrackedIncoming {
    pub fn new(listener: TcpListener, tracker: TransportTracker) -> Self {
        Self {
            listener,
            tracker: Arc::new(tracker),
            error_sleep: None,
        }
    }
}

impl Stream for TrackedIncoming {
    type Item = Result<TrackedStream, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(sleep) = this.error_sleep.as_mut() {
                match sleep.as_mut().poll(cx) {
                    Poll::Ready(()) => this.error_sleep = None,
                    Poll::Pending => return Poll::Pending,
                }
            }
            match this.listener.poll_accept(cx) {
                Poll::Ready(Ok((stream, remote_addr))) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("failed to set TCP_NODELAY on {}: {}", remote_addr, e);
                    }
                    let info = this.tracker.on_transport_ready(Some(remote_addr));
                    return Poll::Ready(Some(Ok(TrackedStream::new(
                        stream,
                        info,
                        this.tracker.clone(),
                    ))));
                }
                // Transient accept failures (e.g. the peer resetting
                // between accept and here) must not take the server down;
                // retry after a short pause rather than spinning.
                Poll::Ready(Err(e)) => {
                    tracing::warn!(
                        "failed to accept connection: {}; retrying in {:?}",
                        e,
                        ACCEPT_ERROR_DELAY
                    );
                    this.error_sleep = Some(Box::pin(tokio::time::sleep(ACCEPT_ERROR_DELAY)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
