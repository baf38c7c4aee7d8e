//! Session state machine
//!
//! Tracks one client connection from accept to close:
//!
//! ```text
//! Accepted ──► Handshaking ──► Streaming ──► Closed
//!     │             │              │
//!     └─────────────┴──────────────┴──────► Closed
//! ```

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::stats::SessionStats;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// TCP connection accepted, nothing read yet
    Accepted,
    /// Reading the request / writing the response head
    Handshaking,
    /// Multipart parts are being sent
    Streaming,
    /// Connection released
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed before or during the request
    PeerClosed,
    /// Request was not a GET
    BadRequest,
    /// Peer did not send a request in time
    HandshakeTimeout,
    /// A write failed or timed out
    WriteFailed,
    /// Liveness probe reported a closed or broken peer
    Disconnected,
    /// Server is stopping
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer closed",
            CloseReason::BadRequest => "bad request",
            CloseReason::HandshakeTimeout => "handshake timeout",
            CloseReason::WriteFailed => "write failed",
            CloseReason::Disconnected => "disconnected",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Complete session state
#[derive(Debug)]
pub struct SessionState {
    /// Unique session ID
    pub id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: SessionPhase,

    /// Connection accept time
    pub connected_at: Instant,

    /// Time the response head was sent
    pub streaming_started_at: Option<Instant>,

    /// Generation of the last frame sent to this client
    pub last_generation: u64,

    /// Why the session ended (set once closed)
    pub close_reason: Option<CloseReason>,

    /// Traffic counters
    pub stats: SessionStats,
}

impl SessionState {
    /// Create a new session state
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: SessionPhase::Accepted,
            connected_at: Instant::now(),
            streaming_started_at: None,
            last_generation: 0,
            close_reason: None,
            stats: SessionStats::default(),
        }
    }

    /// Transition to handshaking phase
    pub fn start_handshake(&mut self) {
        if self.phase == SessionPhase::Accepted {
            self.phase = SessionPhase::Handshaking;
        }
    }

    /// Response head sent, start streaming
    pub fn start_streaming(&mut self) {
        if self.phase == SessionPhase::Handshaking {
            self.phase = SessionPhase::Streaming;
            self.streaming_started_at = Some(Instant::now());
        }
    }

    /// Record a part written to the client
    pub fn on_frame_sent(&mut self, generation: u64, bytes: usize) {
        self.last_generation = generation;
        self.stats.frames_sent += 1;
        self.stats.bytes_sent += bytes as u64;
    }

    /// Close the session; the first reason wins
    pub fn close(&mut self, reason: CloseReason) {
        if self.phase != SessionPhase::Closed {
            self.phase = SessionPhase::Closed;
            self.close_reason = Some(reason);
            self.stats.duration = self.duration();
        }
    }

    /// Get session duration
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Time spent streaming, zero if the response head was never sent
    pub fn streaming_duration(&self) -> Duration {
        self.streaming_started_at
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }
}
