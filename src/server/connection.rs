//! Per-connection stream handler
//!
//! One task per client. Reads the request, sends the multipart response
//! head, then loops: probe liveness, snapshot the slot, encode, write one
//! part, sleep out the rest of the frame interval.
//!
//! Failures here end this connection only. Nothing is reported back to the
//! acceptor or to other clients.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::ReadBuf;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::EncodeError;
use crate::frame::{FrameSnapshot, PixelFormat};
use crate::protocol::constants::MAX_REQUEST_HEAD;
use crate::protocol::handshake::{drain_request_head, is_get_request, read_request, request_path};
use crate::protocol::multipart::{write_part, write_preamble};
use crate::server::context::ServerContext;
use crate::session::{CloseReason, SessionState};

/// A single client connection
pub(crate) struct Connection {
    socket: TcpStream,
    state: SessionState,
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
    /// Last encoded frame, reused while the slot generation is unchanged
    cached: Option<(u64, Bytes)>,
}

impl Connection {
    pub fn new(
        session_id: u64,
        socket: TcpStream,
        peer_addr: SocketAddr,
        ctx: Arc<ServerContext>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            socket,
            state: SessionState::new(session_id, peer_addr),
            ctx,
            cancel,
            cached: None,
        }
    }

    /// Serve the client until it goes away or the server stops
    ///
    /// The socket is closed when `self` is dropped at the end of this call.
    pub async fn run(mut self) {
        self.ctx.metrics.connection_opened();

        let reason = match self.handshake().await {
            Ok(()) => self.stream().await,
            Err(reason) => reason,
        };

        self.state.close(reason);
        self.ctx.metrics.connection_closed();

        let state = &self.state;
        tracing::debug!(
            session_id = state.id,
            peer = %state.peer_addr,
            reason = state.close_reason.map_or("unknown", |r| r.as_str()),
            frames = state.stats.frames_sent,
            bytes = state.stats.bytes_sent,
            last_generation = state.last_generation,
            fps = state.stats.frame_rate(),
            bitrate = state.stats.bitrate(),
            streamed_ms = state.streaming_duration().as_millis() as u64,
            duration_ms = state.stats.duration.as_millis() as u64,
            "Client disconnected"
        );
    }

    async fn handshake(&mut self) -> Result<(), CloseReason> {
        self.state.start_handshake();
        let config = &self.ctx.config;

        let deadline = Instant::now() + config.handshake_timeout;

        let request = guarded_read(
            &self.cancel,
            deadline,
            read_request(&mut self.socket, config.request_buffer_size),
        )
        .await?
        .ok_or(CloseReason::PeerClosed)?;

        if !is_get_request(&request) {
            tracing::debug!(session_id = self.state.id, "Ignoring non-GET request");
            return Err(CloseReason::BadRequest);
        }

        // Leftover header bytes would hide the peer's FIN from the liveness check
        let drained = guarded_read(
            &self.cancel,
            deadline,
            drain_request_head(&mut self.socket, &request, MAX_REQUEST_HEAD),
        )
        .await?;

        tracing::debug!(
            session_id = self.state.id,
            path = request_path(&request).unwrap_or("?"),
            request_bytes = request.len() + drained,
            "Stream requested"
        );

        guarded_write(
            &self.cancel,
            config.write_timeout,
            write_preamble(&mut self.socket),
        )
        .await?;

        self.state.start_streaming();
        Ok(())
    }

    async fn stream(&mut self) -> CloseReason {
        let frame_interval = self.ctx.config.frame_interval;
        let empty_backoff = self.ctx.config.empty_frame_backoff;
        let error_backoff = self.ctx.config.encode_error_backoff;
        let write_timeout = self.ctx.config.write_timeout;

        loop {
            if self.cancel.is_cancelled() {
                return CloseReason::Shutdown;
            }

            if let Some(reason) = self.probe().await {
                return reason;
            }

            let Some(snapshot) = self.ctx.slot.snapshot() else {
                if !self.pause(empty_backoff).await {
                    return CloseReason::Shutdown;
                }
                continue;
            };

            let started = Instant::now();

            let payload = match self.encode(&snapshot).await {
                Ok(payload) => payload,
                Err(e) => {
                    self.state.stats.encode_errors += 1;
                    self.ctx.metrics.encode_error();
                    tracing::warn!(
                        session_id = self.state.id,
                        generation = snapshot.generation,
                        error = %e,
                        "Error encoding frame"
                    );
                    if !self.pause(error_backoff).await {
                        return CloseReason::Shutdown;
                    }
                    continue;
                }
            };

            let sent = match guarded_write(
                &self.cancel,
                write_timeout,
                write_part(&mut self.socket, &payload),
            )
            .await
            {
                Ok(sent) => sent,
                Err(reason) => return reason,
            };

            self.state.on_frame_sent(snapshot.generation, sent);
            self.ctx.metrics.frame_sent(sent);

            tracing::trace!(
                session_id = self.state.id,
                generation = snapshot.generation,
                bytes = sent,
                "Frame sent"
            );

            if !self.pause_until(started + frame_interval).await {
                return CloseReason::Shutdown;
            }
        }
    }

    /// Non-blocking, non-consuming check for a closed peer
    async fn probe(&self) -> Option<CloseReason> {
        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);

        let peeked = std::future::poll_fn(|cx| {
            Poll::Ready(match self.socket.poll_peek(cx, &mut buf) {
                Poll::Ready(result) => Some(result),
                Poll::Pending => None,
            })
        })
        .await;

        match peeked {
            // Nothing to read right now
            None => None,
            Some(Ok(0)) => Some(CloseReason::Disconnected),
            Some(Ok(_)) => None,
            Some(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => None,
            Some(Err(e)) => {
                tracing::debug!(session_id = self.state.id, error = %e, "Liveness probe failed");
                Some(CloseReason::Disconnected)
            }
        }
    }

    /// Encode a snapshot outside any lock
    ///
    /// Raw frames are encoded on the blocking pool, pre-encoded JPEG frames
    /// inline.
    async fn encode(&mut self, snapshot: &FrameSnapshot) -> Result<Bytes, EncodeError> {
        if let Some((generation, payload)) = &self.cached {
            if *generation == snapshot.generation {
                return Ok(payload.clone());
            }
        }

        let quality = self.ctx.config.jpeg_quality;

        let payload = if snapshot.frame.format == PixelFormat::Jpeg {
            // Already compressed; not worth a trip to the blocking pool
            self.ctx.encoder.encode(&snapshot.frame, quality)?
        } else {
            let encoder = Arc::clone(&self.ctx.encoder);
            let frame = snapshot.frame.clone();
            tokio::task::spawn_blocking(move || encoder.encode(&frame, quality))
                .await
                .map_err(|e| EncodeError::Codec(format!("encoder task failed: {}", e)))??
        };

        self.cached = Some((snapshot.generation, payload.clone()));
        Ok(payload)
    }

    /// Sleep unless the server is stopping; false means stop
    async fn pause(&self, duration: Duration) -> bool {
        self.pause_until(Instant::now() + duration).await
    }

    async fn pause_until(&self, deadline: Instant) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep_until(deadline) => true,
        }
    }
}

/// Run a handshake read against a deadline, abandoning it on shutdown
async fn guarded_read<F, T>(
    cancel: &CancellationToken,
    deadline: Instant,
    read: F,
) -> Result<T, CloseReason>
where
    F: Future<Output = std::io::Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(CloseReason::Shutdown),
        result = tokio::time::timeout_at(deadline, read) => match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Request read failed");
                Err(CloseReason::PeerClosed)
            }
            Err(_) => Err(CloseReason::HandshakeTimeout),
        },
    }
}

/// Run a write with a timeout, abandoning it on shutdown
async fn guarded_write<F, T>(
    cancel: &CancellationToken,
    limit: Duration,
    write: F,
) -> Result<T, CloseReason>
where
    F: Future<Output = std::io::Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(CloseReason::Shutdown),
        result = tokio::time::timeout(limit, write) => match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) | Err(_) => Err(CloseReason::WriteFailed),
        },
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::codec::{FrameEncoder, JpegEncoder};
    use crate::frame::Frame;
    use crate::protocol::constants::RESPONSE_PREAMBLE;
    use crate::server::config::ServerConfig;

    /// Encoder that always fails
    struct FailingEncoder;

    impl FrameEncoder for FailingEncoder {
        fn encode(&self, _frame: &Frame, _quality: u8) -> Result<Bytes, EncodeError> {
            Err(EncodeError::Codec("broken".into()))
        }
    }

    /// Passes through to `JpegEncoder`, remembering which thread ran it
    struct ThreadTrackingEncoder {
        threads: std::sync::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl FrameEncoder for ThreadTrackingEncoder {
        fn encode(&self, frame: &Frame, quality: u8) -> Result<Bytes, EncodeError> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            JpegEncoder::new().encode(frame, quality)
        }
    }

    fn test_context(encoder: Arc<dyn FrameEncoder>) -> Arc<ServerContext> {
        let config = ServerConfig::default()
            .frame_interval(Duration::from_millis(10))
            .encode_error_backoff(Duration::from_millis(10));
        Arc::new(ServerContext::new(config, encoder))
    }

    /// Connected (client, server-side connection) pair
    async fn connect(
        ctx: &Arc<ServerContext>,
        cancel: &CancellationToken,
    ) -> (TcpStream, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (socket, peer) = listener.accept().await.unwrap();

        let connection = Connection::new(1, socket, peer, Arc::clone(ctx), cancel.child_token());
        (client, connection)
    }

    #[tokio::test]
    async fn test_guarded_write_ok() {
        let cancel = CancellationToken::new();
        let result = guarded_write(&cancel, Duration::from_secs(1), async { Ok(5usize) }).await;
        assert_eq!(result, Ok(5));
    }

    #[tokio::test]
    async fn test_guarded_write_error() {
        let cancel = CancellationToken::new();
        let result: Result<(), _> = guarded_write(&cancel, Duration::from_secs(1), async {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        })
        .await;
        assert_eq!(result, Err(CloseReason::WriteFailed));
    }

    #[tokio::test]
    async fn test_guarded_write_timeout() {
        let cancel = CancellationToken::new();
        let result: Result<(), _> = guarded_write(
            &cancel,
            Duration::from_millis(10),
            std::future::pending::<std::io::Result<()>>(),
        )
        .await;
        assert_eq!(result, Err(CloseReason::WriteFailed));
    }

    #[tokio::test]
    async fn test_guarded_write_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = guarded_write(
            &cancel,
            Duration::from_secs(10),
            std::future::pending::<std::io::Result<()>>(),
        )
        .await;
        assert_eq!(result, Err(CloseReason::Shutdown));
    }

    #[tokio::test]
    async fn test_non_get_gets_no_response() {
        let ctx = test_context(Arc::new(JpegEncoder::new()));
        let cancel = CancellationToken::new();
        let (mut client, connection) = connect(&ctx, &cancel).await;

        client.write_all(b"POST / HTTP/1.1\r\n\r\n").await.unwrap();
        connection.run().await;

        // Server closed without writing anything
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
        assert_eq!(ctx.metrics.snapshot().active_connections, 0);
    }

    #[tokio::test]
    async fn test_probe_detects_closed_peer() {
        let ctx = test_context(Arc::new(JpegEncoder::new()));
        let cancel = CancellationToken::new();
        let (client, connection) = connect(&ctx, &cancel).await;

        assert_eq!(connection.probe().await, None);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(connection.probe().await, Some(CloseReason::Disconnected));
    }

    #[tokio::test]
    async fn test_probe_does_not_consume() {
        let ctx = test_context(Arc::new(JpegEncoder::new()));
        let cancel = CancellationToken::new();
        let (mut client, mut connection) = connect(&ctx, &cancel).await;

        client.write_all(b"xy").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(connection.probe().await, None);

        let mut buf = [0u8; 2];
        connection.socket.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"xy");
    }

    #[tokio::test]
    async fn test_encode_error_is_transient() {
        let ctx = test_context(Arc::new(FailingEncoder));
        ctx.slot.publish(Frame::rgb(2, 2, vec![0u8; 12]));

        let cancel = CancellationToken::new();
        let (mut client, connection) = connect(&ctx, &cancel).await;
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let handle = tokio::spawn(connection.run());

        let mut head = vec![0u8; RESPONSE_PREAMBLE.len()];
        client.read_exact(&mut head).await.unwrap();
        assert_eq!(&head[..], RESPONSE_PREAMBLE);

        // Keeps retrying instead of dropping the client
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
        assert!(ctx.metrics.snapshot().encode_errors >= 2);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.metrics.snapshot().frames_sent, 0);
    }

    #[tokio::test]
    async fn test_encoded_frame_reused_for_same_generation() {
        let ctx = test_context(Arc::new(JpegEncoder::new()));
        ctx.slot.publish(Frame::rgb(2, 2, vec![10u8; 12]));

        let cancel = CancellationToken::new();
        let (_client, mut connection) = connect(&ctx, &cancel).await;

        let snapshot = ctx.slot.snapshot().unwrap();
        let first = connection.encode(&snapshot).await.unwrap();
        let second = connection.encode(&snapshot).await.unwrap();

        // Same allocation handed back
        assert_eq!(first.as_ptr(), second.as_ptr());
    }

    #[tokio::test]
    async fn test_jpeg_frames_skip_blocking_pool() {
        let encoder = Arc::new(ThreadTrackingEncoder {
            threads: std::sync::Mutex::new(Vec::new()),
        });
        let ctx = test_context(encoder.clone());
        let cancel = CancellationToken::new();
        let (_client, mut connection) = connect(&ctx, &cancel).await;

        ctx.slot.publish(Frame::jpeg(vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9]));
        let jpeg = ctx.slot.snapshot().unwrap();
        assert_eq!(&connection.encode(&jpeg).await.unwrap()[..], &[0xFF, 0xD8, 0x01, 0xFF, 0xD9]);

        ctx.slot.publish(Frame::rgb(2, 2, vec![50u8; 12]));
        let raw = ctx.slot.snapshot().unwrap();
        connection.encode(&raw).await.unwrap();

        let here = std::thread::current().id();
        let threads = encoder.threads.lock().unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0], here);
        assert_ne!(threads[1], here);
    }
}
