//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::constants::*;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent clients (0 = unlimited)
    pub max_connections: usize,

    /// JPEG quality passed to the encoder (1-100)
    pub jpeg_quality: u8,

    /// Minimum time between two parts sent to the same client
    pub frame_interval: Duration,

    /// Sleep while nothing has been published yet
    pub empty_frame_backoff: Duration,

    /// Sleep after a failed encode before trying again
    pub encode_error_backoff: Duration,

    /// Size of the buffer used to read the request
    pub request_buffer_size: usize,

    /// Time a client has to send its request
    pub handshake_timeout: Duration,

    /// A single write stalled longer than this drops the client
    pub write_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Listen backlog
    pub listen_backlog: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            empty_frame_backoff: DEFAULT_EMPTY_FRAME_BACKOFF,
            encode_error_backoff: DEFAULT_ENCODE_ERROR_BACKOFF,
            request_buffer_size: DEFAULT_REQUEST_BUFFER_SIZE,
            handshake_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            tcp_nodelay: true, // Parts are latency sensitive
            listen_backlog: 128,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Create a new config listening on all interfaces at `port`
    pub fn with_port(port: u16) -> Self {
        Self::default().port(port)
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the port, keeping the bind IP
    pub fn port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set JPEG quality
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Set the per-client pacing interval
    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Set the pacing interval from a target frame rate
    pub fn max_fps(mut self, fps: u32) -> Self {
        self.frame_interval = Duration::from_secs(1) / fps.max(1);
        self
    }

    /// Set the request read timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the per-write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the backoff used after encode failures
    pub fn encode_error_backoff(mut self, backoff: Duration) -> Self {
        self.encode_error_backoff = backoff;
        self
    }
}
