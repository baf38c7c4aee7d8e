//! Statistics and metrics for the broadcast server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Session-level statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Parts written to the client
    pub frames_sent: u64,
    /// Total bytes written, including part headers
    pub bytes_sent: u64,
    /// Encode failures seen by this session
    pub encode_errors: u64,
    /// Connection duration (filled in on close)
    pub duration: Duration,
}

impl SessionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Average frames per second over the session
    pub fn frame_rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.frames_sent as f64 / secs
        } else {
            0.0
        }
    }

    /// Average bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let millis = self.duration.as_millis() as u64;
        if millis > 0 {
            self.bytes_sent * 8 * 1000 / millis
        } else {
            0
        }
    }
}

/// Live server-wide counters
///
/// Shared by the acceptor and every connection task. All updates are
/// relaxed atomics; readers get a point-in-time [`ServerStats`].
#[derive(Debug)]
pub struct ServerMetrics {
    started_at: Instant,
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,
    frames_published: AtomicU64,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    encode_errors: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
            frames_published: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            encode_errors: AtomicU64::new(0),
        }
    }

    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturate rather than wrap if open/close ever get out of step
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_published(&self) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn encode_error(&self) {
        self.encode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Total connections ever accepted
    pub total_connections: u64,
    /// Connection tasks currently running
    pub active_connections: u64,
    /// Connections dropped because of the connection limit
    pub rejected_connections: u64,
    /// Frames accepted by `publish`
    pub frames_published: u64,
    /// Parts written across all clients
    pub frames_sent: u64,
    /// Bytes written across all clients
    pub bytes_sent: u64,
    /// Encode failures across all clients
    pub encode_errors: u64,
    /// Time since the metrics were created
    pub uptime: Duration,
}
