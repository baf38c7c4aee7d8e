//! Frame types
//!
//! A frame is either raw pixels (with known layout) or an already encoded
//! JPEG. Both are opaque to the server apart from what the encoder needs.

use bytes::Bytes;

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Pre-encoded JPEG, sent as-is
    Jpeg,
    /// 8-bit RGB, 3 bytes per pixel
    Rgb8,
    /// 8-bit RGBA, 4 bytes per pixel
    Rgba8,
    /// 8-bit BGR, 3 bytes per pixel (typical camera capture order)
    Bgr8,
    /// 8-bit grayscale
    Gray8,
}

impl PixelFormat {
    /// Bytes per pixel for raw formats, `None` for compressed formats
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Jpeg => None,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => Some(3),
            PixelFormat::Rgba8 => Some(4),
            PixelFormat::Gray8 => Some(1),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Jpeg => "jpeg",
            PixelFormat::Rgb8 => "rgb8",
            PixelFormat::Rgba8 => "rgba8",
            PixelFormat::Bgr8 => "bgr8",
            PixelFormat::Gray8 => "gray8",
        }
    }
}

/// One image sample from the producer
///
/// Cheap to clone: the pixel data is reference counted and immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Pixel layout
    pub format: PixelFormat,
    /// Width in pixels (0 when unknown for pre-encoded frames)
    pub width: u32,
    /// Height in pixels (0 when unknown for pre-encoded frames)
    pub height: u32,
    /// Frame bytes
    pub data: Bytes,
}

impl Frame {
    /// Create a frame from raw or encoded bytes
    pub fn new(format: PixelFormat, width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self {
            format,
            width,
            height,
            data: data.into(),
        }
    }

    /// Create a frame from an already encoded JPEG
    pub fn jpeg(data: impl Into<Bytes>) -> Self {
        Self::new(PixelFormat::Jpeg, 0, 0, data)
    }

    /// Create an RGB frame
    pub fn rgb(width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self::new(PixelFormat::Rgb8, width, height, data)
    }

    /// Create a BGR frame
    pub fn bgr(width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self::new(PixelFormat::Bgr8, width, height, data)
    }

    /// Expected buffer length for raw formats
    pub fn expected_len(&self) -> Option<usize> {
        self.format
            .bytes_per_pixel()
            .map(|bpp| self.width as usize * self.height as usize * bpp)
    }

    /// Whether this frame carries no usable image
    ///
    /// Raw frames with zero dimensions or a buffer that does not match the
    /// dimensions count as empty.
    pub fn is_empty(&self) -> bool {
        if self.data.is_empty() {
            return true;
        }

        match self.expected_len() {
            Some(expected) => expected == 0 || expected != self.data.len(),
            None => false,
        }
    }

    /// Size of the frame buffer in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}
