//! Server lifecycle controller

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{FrameEncoder, JpegEncoder};
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameSlot};
use crate::server::config::ServerConfig;
use crate::server::context::ServerContext;
use crate::server::listener::{self, Acceptor};
use crate::stats::ServerStats;

/// Lifecycle state of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct Lifecycle {
    state: ServerState,
    cancel: Option<CancellationToken>,
    acceptor: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

/// MJPEG broadcast server
///
/// One producer calls [`publish`](Self::publish); any number of HTTP
/// clients receive the latest frame as a `multipart/x-mixed-replace`
/// stream, each paced independently.
///
/// All methods take `&self`, so the server can be shared behind an `Arc`
/// between the capture loop and whatever controls start/stop.
///
/// # Example
/// ```no_run
/// use mjpeg_rs::{Frame, MjpegServer, ServerConfig};
///
/// # async fn example() -> mjpeg_rs::error::Result<()> {
/// let server = MjpegServer::new(ServerConfig::with_port(8080));
/// server.start()?;
/// println!("Streaming at {}", server.stream_url());
///
/// server.publish(Frame::rgb(2, 2, vec![255u8; 12]));
///
/// server.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct MjpegServer {
    ctx: Arc<ServerContext>,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl MjpegServer {
    /// Create a server that encodes with the default JPEG encoder
    pub fn new(config: ServerConfig) -> Self {
        Self::with_encoder(config, JpegEncoder::new())
    }

    /// Create a server with a custom encoder
    pub fn with_encoder<E: FrameEncoder>(config: ServerConfig, encoder: E) -> Self {
        Self {
            ctx: Arc::new(ServerContext::new(config, Arc::new(encoder))),
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: ServerState::Stopped,
                cancel: None,
                acceptor: None,
                local_addr: None,
            })),
        }
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    /// The slot clients read from
    pub fn frame_slot(&self) -> &Arc<FrameSlot> {
        &self.ctx.slot
    }

    /// Replace the frame being broadcast
    ///
    /// Safe to call at any time, including before `start()` and after
    /// `stop()`. Empty frames are ignored. Returns the frame's generation,
    /// or `None` if it was ignored.
    pub fn publish(&self, frame: Frame) -> Option<u64> {
        let generation = self.ctx.slot.publish(frame);
        if generation.is_some() {
            self.ctx.metrics.frame_published();
        }
        generation
    }

    /// Bind the listening socket and spawn the accept loop
    ///
    /// Returns once the accept loop has been spawned. Fails with
    /// [`Error::AlreadyRunning`] if the server is not stopped,
    /// [`Error::NoRuntime`] when called outside a Tokio runtime, or
    /// [`Error::Bind`] if the socket could not be set up.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        {
            let mut lifecycle = self.lock();
            if lifecycle.state != ServerState::Stopped {
                tracing::warn!(state = ?lifecycle.state, "MJPEG server is already running");
                return Err(Error::AlreadyRunning);
            }
            lifecycle.state = ServerState::Starting;
        }

        let (listener, local_addr) = match self.open_listener() {
            Ok(opened) => opened,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start MJPEG server");
                self.lock().state = ServerState::Stopped;
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let acceptor = runtime.spawn(Acceptor::new(listener, Arc::clone(&self.ctx)).run(cancel.clone()));

        {
            let mut lifecycle = self.lock();
            lifecycle.state = ServerState::Running;
            lifecycle.cancel = Some(cancel);
            lifecycle.acceptor = Some(acceptor);
            lifecycle.local_addr = Some(local_addr);
        }

        tracing::info!(url = %self.stream_url(), "MJPEG stream available");
        Ok(())
    }

    fn open_listener(&self) -> Result<(TcpListener, SocketAddr)> {
        let listener = listener::bind(&self.ctx.config)?;
        let local_addr = listener.local_addr()?;
        Ok((listener, local_addr))
    }

    /// Stop accepting and signal every client to finish
    ///
    /// Waits for the accept loop to exit, which closes the listening
    /// socket. Does not wait for client tasks; they notice the
    /// cancellation within one loop iteration. No-op if not running.
    ///
    /// Cancel safe: if this future is dropped before it completes, the
    /// accept loop is still stopped and the server still reaches
    /// [`ServerState::Stopped`] once the listener is closed.
    pub async fn stop(&self) {
        let acceptor = {
            let mut lifecycle = self.lock();
            if lifecycle.state != ServerState::Running {
                return;
            }
            lifecycle.state = ServerState::Stopping;
            if let Some(cancel) = lifecycle.cancel.take() {
                cancel.cancel();
            }
            lifecycle.acceptor.take()
        };

        tracing::info!("Shutting down MJPEG server");

        let mut pending = PendingStop {
            lifecycle: &self.lifecycle,
            acceptor,
        };

        let joined = match pending.acceptor.as_mut() {
            Some(acceptor) => Some(acceptor.await),
            None => None,
        };
        pending.acceptor = None;
        drop(pending);

        if let Some(Err(e)) = joined {
            tracing::error!(error = %e, "Accept loop terminated abnormally");
        }

        tracing::info!("MJPEG server stopped");
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Address actually bound, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }

    /// URL a browser can open to watch the stream
    pub fn stream_url(&self) -> String {
        let port = self
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or_else(|| self.ctx.config.bind_addr.port());
        format!("http://localhost:{}/", port)
    }

    /// Snapshot of server-wide counters
    pub fn stats(&self) -> ServerStats {
        self.ctx.metrics.snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        lock(&self.lifecycle)
    }
}

impl Drop for MjpegServer {
    fn drop(&mut self) {
        // Can't await the accept loop here; cancelling lets every task wind
        // down and release its socket on its own.
        if let Some(cancel) = self.lock().cancel.take() {
            cancel.cancel();
        }
    }
}

fn lock(lifecycle: &Mutex<Lifecycle>) -> MutexGuard<'_, Lifecycle> {
    lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Moves the server from `Stopping` to `Stopped` when dropped
///
/// Holds the accept loop handle while `stop()` waits on it. If `stop()` is
/// abandoned first, the wait continues on a spawned task so the state only
/// changes once the listening socket is gone.
struct PendingStop<'a> {
    lifecycle: &'a Arc<Mutex<Lifecycle>>,
    acceptor: Option<JoinHandle<()>>,
}

impl Drop for PendingStop<'_> {
    fn drop(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            if !acceptor.is_finished() {
                if let Ok(runtime) = Handle::try_current() {
                    let lifecycle = Arc::clone(self.lifecycle);
                    runtime.spawn(async move {
                        let _ = acceptor.await;
                        mark_stopped(&lifecycle);
                    });
                    return;
                }
            }
        }

        mark_stopped(self.lifecycle);
    }
}

fn mark_stopped(lifecycle: &Mutex<Lifecycle>) {
    let mut lifecycle = lock(lifecycle);
    if lifecycle.state == ServerState::Stopping {
        lifecycle.state = ServerState::Stopped;
        lifecycle.local_addr = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn local_config() -> ServerConfig {
        ServerConfig::with_addr("127.0.0.1:0".parse().unwrap())
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let server = MjpegServer::new(local_config());

        assert!(matches!(server.start(), Err(Error::NoRuntime)));
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());
    }

    #[test]
    fn test_new_server_is_stopped() {
        let server = MjpegServer::new(ServerConfig::with_port(9000));
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());
        assert_eq!(server.stream_url(), "http://localhost:9000/");
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let server = MjpegServer::new(local_config());
        server.stop().await;
        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let server = MjpegServer::new(local_config());
        server.start().unwrap();
        let addr = server.local_addr().unwrap();

        assert!(matches!(server.start(), Err(Error::AlreadyRunning)));
        assert!(server.is_running());
        assert_eq!(server.local_addr(), Some(addr));

        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_stream_url_uses_bound_port() {
        let server = MjpegServer::new(local_config());
        server.start().unwrap();

        let port = server.local_addr().unwrap().port();
        assert_eq!(server.stream_url(), format!("http://localhost:{}/", port));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure_leaves_server_stopped() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let server = MjpegServer::new(ServerConfig::with_addr(taken.local_addr().unwrap()));

        assert!(matches!(server.start(), Err(Error::Bind { .. })));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_publish_before_start() {
        let server = MjpegServer::new(local_config());

        assert_eq!(server.publish(Frame::jpeg(vec![0xFF, 0xD8, 0xFF, 0xD9])), Some(1));
        assert_eq!(server.publish(Frame::jpeg(Vec::new())), None);

        assert!(server.frame_slot().has_frame());
        assert_eq!(server.stats().frames_published, 1);
    }

    #[tokio::test]
    async fn test_restart() {
        let server = MjpegServer::new(local_config());

        server.start().unwrap();
        server.stop().await;

        server.start().unwrap();
        assert!(server.is_running());
        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_listener() {
        let server = MjpegServer::new(local_config());
        server.start().unwrap();
        let addr = server.local_addr().unwrap();

        server.stop().await;

        let result =
            tokio::time::timeout(Duration::from_secs(1), tokio::net::TcpStream::connect(addr)).await;
        assert!(matches!(result, Ok(Err(_))));
    }

    #[tokio::test]
    async fn test_abandoned_stop_still_stops() {
        let server = MjpegServer::new(local_config());
        server.start().unwrap();
        let addr = server.local_addr().unwrap();

        // Drop stop() after its first poll, before the accept loop is joined
        let _ = tokio::time::timeout(Duration::ZERO, server.stop()).await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while server.state() != ServerState::Stopped && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());

        // Not wedged: start and stop work again
        server.start().unwrap();
        assert!(server.is_running());
        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
    }
}
