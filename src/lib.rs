//! # mjpeg-rs
//!
//! Live MJPEG-over-HTTP broadcast server.
//!
//! A single producer (a camera loop, a renderer, a test pattern) publishes
//! frames; every HTTP client that issues a `GET` gets its own
//! `multipart/x-mixed-replace` stream of JPEG parts, paced independently of
//! the producer and of other clients.
//!
//! ```text
//!   producer ──publish()──► FrameSlot ──snapshot()──► Connection ×N ──► TCP
//!                              (latest frame only, last write wins)
//! ```
//!
//! Slow clients simply skip frames; there is no per-client queue. A client
//! that disconnects or stalls is dropped without affecting anyone else.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use mjpeg_rs::{Frame, MjpegServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = MjpegServer::new(ServerConfig::with_port(8080));
//!     server.start()?;
//!
//!     for i in 0..300u32 {
//!         let shade = (i % 256) as u8;
//!         server.publish(Frame::rgb(320, 240, vec![shade; 320 * 240 * 3]));
//!         tokio::time::sleep(Duration::from_millis(33)).await;
//!     }
//!
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stats;

pub use codec::{FrameEncoder, JpegEncoder};
pub use error::{EncodeError, Error, Result};
pub use frame::{Frame, FrameSlot, FrameSnapshot, PixelFormat};
pub use server::{MjpegServer, ServerConfig, ServerState};
pub use stats::{ServerStats, SessionStats};
