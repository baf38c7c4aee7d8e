//! MJPEG HTTP server
//!
//! ```text
//!  MjpegServer::start()
//!        │
//!        ▼
//!   [Acceptor] ── accept ──► tokio::spawn(Connection::run)  × N
//!        ▲                         │
//!        └──── CancellationToken ──┘  (child token per connection)
//! ```

pub mod config;
pub(crate) mod connection;
pub(crate) mod context;
pub mod lifecycle;
pub(crate) mod listener;

pub use config::ServerConfig;
pub use lifecycle::{MjpegServer, ServerState};
