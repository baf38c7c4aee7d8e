//! State shared by the acceptor and all connection tasks

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::codec::FrameEncoder;
use crate::frame::FrameSlot;
use crate::server::config::ServerConfig;
use crate::stats::ServerMetrics;

/// Everything a connection needs besides its socket
///
/// Lives as long as the `MjpegServer` and survives restarts, so frames
/// published while stopped are still there on the next `start()`.
pub(crate) struct ServerContext {
    pub config: ServerConfig,
    pub slot: Arc<FrameSlot>,
    pub encoder: Arc<dyn FrameEncoder>,
    pub metrics: ServerMetrics,
    pub connection_semaphore: Option<Arc<Semaphore>>,
    next_session_id: AtomicU64,
}

impl ServerContext {
    pub fn new(config: ServerConfig, encoder: Arc<dyn FrameEncoder>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            slot: Arc::new(FrameSlot::new()),
            encoder,
            metrics: ServerMetrics::new(),
            connection_semaphore,
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Allocate a session ID, unique for the life of the server
    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }
}
