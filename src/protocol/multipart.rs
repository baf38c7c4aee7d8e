//! multipart/x-mixed-replace framing
//!
//! Each part on the wire:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JPEG>\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::constants::{BOUNDARY_LINE, CRLF, PART_CONTENT_TYPE, RESPONSE_PREAMBLE};

/// Build the header block of one part
pub fn part_header(content_length: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(80);
    buf.put_slice(BOUNDARY_LINE);
    buf.put_slice(b"Content-Type: ");
    buf.put_slice(PART_CONTENT_TYPE.as_bytes());
    buf.put_slice(CRLF);
    buf.put_slice(b"Content-Length: ");
    buf.put_slice(content_length.to_string().as_bytes());
    buf.put_slice(CRLF);
    buf.put_slice(CRLF);
    buf.freeze()
}

/// Write the response head
pub async fn write_preamble<W>(writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(RESPONSE_PREAMBLE).await?;
    writer.flush().await
}

/// Write one complete part
///
/// The header block, payload and trailing separator are written as three
/// separate writes; the first failure aborts the part. Returns the number
/// of bytes put on the wire.
pub async fn write_part<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let header = part_header(payload.len());

    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.write_all(CRLF).await?;
    writer.flush().await?;

    Ok(header.len() + payload.len() + CRLF.len())
}
