//! Frame encoding
//!
//! The server never compresses images itself; it hands each snapshot to a
//! [`FrameEncoder`] and writes out whatever bytes come back.

pub mod jpeg;

use bytes::Bytes;

use crate::error::EncodeError;
use crate::frame::Frame;

pub use jpeg::JpegEncoder;

/// Codec collaborator that turns a frame into JPEG bytes
///
/// Implementations are shared by every connection, so they must be
/// thread-safe. Raw frames are encoded on the blocking thread pool.
/// [`PixelFormat::Jpeg`](crate::frame::PixelFormat::Jpeg) frames are
/// handed over on the connection task and should be cheap to pass through.
pub trait FrameEncoder: Send + Sync + 'static {
    /// Encode `frame` at the given quality (0-100)
    fn encode(&self, frame: &Frame, quality: u8) -> Result<Bytes, EncodeError>;
}
