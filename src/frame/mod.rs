//! Latest-frame slot shared between the producer and all clients
//!
//! There is no frame queue. The producer overwrites a single slot and every
//! client handler copies out whatever is current when it is ready to send.
//!
//! ```text
//!    [Producer]                 Arc<FrameSlot>
//!    publish(frame) ──────► ┌──────────────────────┐
//!                           │ Mutex<Option<Frame>> │
//!                           │ generation: u64      │
//!                           └──────────┬───────────┘
//!                                      │ snapshot()
//!              ┌───────────────────────┼───────────────────────┐
//!              ▼                       ▼                       ▼
//!         [Client 1]              [Client 2]              [Client N]
//!         encode + send           encode + send           encode + send
//! ```
//!
//! Frame payloads are `bytes::Bytes`, so a snapshot only bumps a reference
//! count. The stored bytes are never mutated in place, so a reader can never
//! observe a torn frame.

pub mod slot;
pub mod types;

pub use slot::{FrameSlot, FrameSnapshot};
pub use types::{Frame, PixelFormat};
