//! JPEG encoder backed by the `image` crate

use std::borrow::Cow;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::ExtendedColorType;

use super::FrameEncoder;
use crate::error::EncodeError;
use crate::frame::{Frame, PixelFormat};

/// Default encoder
///
/// Pre-encoded JPEG frames are passed through untouched. BGR and RGBA
/// buffers are converted to RGB first.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegEncoder;

impl JpegEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&self, frame: &Frame, quality: u8) -> Result<Bytes, EncodeError> {
        let (pixels, color_type) = match frame.format {
            PixelFormat::Jpeg => return passthrough(frame),
            PixelFormat::Rgb8 => (Cow::Borrowed(&frame.data[..]), ExtendedColorType::Rgb8),
            PixelFormat::Gray8 => (Cow::Borrowed(&frame.data[..]), ExtendedColorType::L8),
            PixelFormat::Bgr8 => (Cow::Owned(swap_bgr(&frame.data)), ExtendedColorType::Rgb8),
            PixelFormat::Rgba8 => (Cow::Owned(strip_alpha(&frame.data)), ExtendedColorType::Rgb8),
        };

        let expected = frame.expected_len().unwrap_or(0);
        if expected == 0 || expected != frame.data.len() {
            return Err(EncodeError::InvalidDimensions {
                width: frame.width,
                height: frame.height,
                len: frame.data.len(),
            });
        }

        // Rough guess; JPEG at typical qualities lands well under 1 byte/pixel
        let mut out = Vec::with_capacity(pixels.len() / 4 + 1024);
        {
            let mut encoder = ImageJpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
            encoder
                .encode(&pixels, frame.width, frame.height, color_type)
                .map_err(|e| EncodeError::Codec(e.to_string()))?;
        }

        Ok(Bytes::from(out))
    }
}

fn passthrough(frame: &Frame) -> Result<Bytes, EncodeError> {
    if frame.data.is_empty() {
        return Err(EncodeError::Codec("empty JPEG buffer".into()));
    }
    Ok(frame.data.clone())
}

fn swap_bgr(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for px in data.chunks_exact(3) {
        out.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    out
}

fn strip_alpha(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 4 * 3);
    for px in data.chunks_exact(4) {
        out.extend_from_slice(&px[..3]);
    }
    out
}
