//! Connection acceptor
//!
//! Owns the listening socket, accepts connections and spawns one handler
//! task per client. Never waits on a client.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::server::context::ServerContext;

/// Pause after a non-transient accept error (e.g. out of file descriptors)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Create the listening socket with address reuse enabled
pub(crate) fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let addr = config.bind_addr;
    let bind_error = |source: std::io::Error| Error::Bind { addr, source };

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_error)?;

    socket.set_reuseaddr(true).map_err(bind_error)?;
    socket.bind(addr).map_err(bind_error)?;
    socket.listen(config.listen_backlog).map_err(bind_error)
}

/// Accept loop for one server run
pub(crate) struct Acceptor {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
}

impl Acceptor {
    pub fn new(listener: TcpListener, ctx: Arc<ServerContext>) -> Self {
        Self { listener, ctx }
    }

    /// Accept until `cancel` fires, then close the listening socket
    ///
    /// Connections already handed off are left running; each one watches
    /// a child of `cancel` and shuts itself down.
    pub async fn run(self, cancel: CancellationToken) {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!(addr = %addr, "MJPEG server listening"),
            Err(e) => tracing::warn!(error = %e, "MJPEG server listening on unknown address"),
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.listener.accept() => result,
            };

            match accepted {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr, &cancel);
                }
                Err(e) if is_transient(&e) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        // Dropping self closes the listening socket
        tracing::info!("Listener closed");
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr, cancel: &CancellationToken) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.ctx.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.ctx.metrics.connection_rejected();
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.ctx.next_session_id();

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if self.ctx.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(session_id = session_id, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let connection = Connection::new(
            session_id,
            socket,
            peer_addr,
            Arc::clone(&self.ctx),
            cancel.child_token(),
        );

        tokio::spawn(async move {
            let _permit = permit;
            connection.run().await;
        });
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&std::io::Error::from(ErrorKind::WouldBlock)));
        assert!(is_transient(&std::io::Error::from(ErrorKind::Interrupted)));
        assert!(!is_transient(&std::io::Error::from(ErrorKind::ConnectionAborted)));
        assert!(!is_transient(&std::io::Error::from(ErrorKind::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let config = ServerConfig::with_addr("127.0.0.1:0".parse().unwrap());
        let listener = bind(&config).unwrap();

        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(addr.ip().is_loopback());
    }

    #[tokio::test]
    async fn test_bind_conflict_reports_address() {
        // Address reuse does not allow binding over an active listener
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let err = bind(&ServerConfig::with_addr(addr)).unwrap_err();
        match err {
            Error::Bind { addr: failed, .. } => assert_eq!(failed, addr),
            other => panic!("unexpected error: {}", other),
        }
    }
}
