//! HTTP handshake
//!
//! The server supports exactly one exchange:
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |------- GET <any path> HTTP/1.x ------>|
//!   |                                        |
//!   |<------ 200 OK + multipart headers ----|
//!   |<------ --frame part ------------------|
//!   |<------ --frame part ------------------|
//!   |              ...                       |
//! ```
//!
//! Anything other than a GET is dropped without a response. The method is
//! checked on a single bounded read; headers, path and query are ignored.
//! Whatever is left of an accepted request head is read and discarded
//! before streaming starts, so later reads on the socket only see what the
//! client sends after its request (normally nothing but the final FIN).

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read the initial request with one bounded read
///
/// Returns `None` if the peer closed before sending anything.
pub async fn read_request<R>(reader: &mut R, max_len: usize) -> std::io::Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::zeroed(max_len.max(1));
    let n = reader.read(&mut buf).await?;

    if n == 0 {
        return Ok(None);
    }

    buf.truncate(n);
    Ok(Some(buf.freeze()))
}

/// Read and discard the rest of the request head
///
/// `request` is what [`read_request`] returned. Stops after the blank line
/// that ends the head, on EOF, or once `limit` bytes in total have been
/// read. Returns the number of extra bytes consumed.
pub async fn drain_request_head<R>(
    reader: &mut R,
    request: &[u8],
    limit: usize,
) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    if has_head_end(request) {
        return Ok(0);
    }

    // Keep enough of the previous read to spot a terminator split across reads
    let mut window = request[request.len().saturating_sub(3)..].to_vec();
    let mut total = request.len();
    let mut drained = 0;
    let mut buf = [0u8; 1024];

    while total < limit {
        let want = buf.len().min(limit - total);
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }

        total += n;
        drained += n;

        window.extend_from_slice(&buf[..n]);
        if has_head_end(&window) {
            break;
        }
        window.drain(..window.len().saturating_sub(3));
    }

    Ok(drained)
}

/// Whether `data` contains the blank line ending a request head
fn has_head_end(data: &[u8]) -> bool {
    data.windows(4).any(|w| w == b"\r\n\r\n") || data.windows(2).any(|w| w == b"\n\n")
}

/// Whether the request line names the GET method
pub fn is_get_request(request: &[u8]) -> bool {
    let start = request
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(request.len());

    request[start..]
        .split(|b| *b == b' ')
        .next()
        .is_some_and(|method| method == b"GET")
}

/// Request path, for logging
pub fn request_path(request: &[u8]) -> Option<&str> {
    let line = request.split(|b| *b == b'\n').next()?;
    let path = line.split(|b| *b == b' ').nth(1)?;
    std::str::from_utf8(path).ok()
}

#[cfg(test)]
mod tests {
    use tokio_test::io::Builder;

    use super::*;

    #[test]
    fn test_is_get_request() {
        assert!(is_get_request(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(is_get_request(b"GET /stream?fps=5 HTTP/1.0\r\n\r\n"));
        assert!(is_get_request(b"\r\nGET / HTTP/1.1\r\n\r\n"));
    }

    #[test]
    fn test_rejects_other_methods() {
        assert!(!is_get_request(b"POST / HTTP/1.1\r\n\r\n"));
        assert!(!is_get_request(b"HEAD / HTTP/1.1\r\n\r\n"));
        assert!(!is_get_request(b"GETX / HTTP/1.1\r\n\r\n"));
        assert!(!is_get_request(b"get / HTTP/1.1\r\n\r\n"));
        assert!(!is_get_request(b""));
        assert!(!is_get_request(b"\x16\x03\x01\x02\x00"));
    }

    #[test]
    fn test_request_path() {
        assert_eq!(request_path(b"GET /video HTTP/1.1\r\n\r\n"), Some("/video"));
        assert_eq!(request_path(b"GET"), None);
    }

    #[tokio::test]
    async fn test_read_request() {
        let mut mock = Builder::new().read(b"GET / HTTP/1.1\r\n\r\n").build();

        let request = read_request(&mut mock, 1024).await.unwrap().unwrap();
        assert_eq!(&request[..], b"GET / HTTP/1.1\r\n\r\n");
    }

    #[tokio::test]
    async fn test_read_request_bounded() {
        let mut mock = Builder::new().read(&[b'A'; 64]).build();

        let request = read_request(&mut mock, 16).await.unwrap().unwrap();
        assert_eq!(request.len(), 16);

        // The rest is left in the stream
        let mut rest = [0u8; 48];
        mock.read_exact(&mut rest).await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_complete_head() {
        let mut mock = Builder::new().build();

        let drained = drain_request_head(&mut mock, b"GET / HTTP/1.1\r\n\r\n", 1024)
            .await
            .unwrap();
        assert_eq!(drained, 0);
    }

    #[tokio::test]
    async fn test_drain_long_head() {
        let cookie = format!("Cookie: {}\r\n", "c".repeat(2000));
        let mut mock = Builder::new()
            .read(cookie.as_bytes())
            .read(b"Accept: */*\r\n\r")
            .read(b"\n")
            .build();

        let drained = drain_request_head(&mut mock, b"GET / HTTP/1.1\r\nHost: x\r\n", 64 * 1024)
            .await
            .unwrap();
        assert_eq!(drained, cookie.len() + 15);
    }

    #[tokio::test]
    async fn test_drain_stops_at_limit() {
        let request = b"GET / HTTP/1.1\r\n";
        let mut mock = Builder::new().read(&[b'A'; 16]).build();

        let drained = drain_request_head(&mut mock, request, request.len() + 16)
            .await
            .unwrap();
        assert_eq!(drained, 16);
    }

    #[tokio::test]
    async fn test_drain_stops_at_eof() {
        let mut mock = Builder::new().read(b"Host: x\r\n").build();

        let drained = drain_request_head(&mut mock, b"GET / HTTP/1.1\r\n", 1024)
            .await
            .unwrap();
        assert_eq!(drained, 9);
    }

    #[test]
    fn test_has_head_end() {
        assert!(has_head_end(b"GET / HTTP/1.1\r\n\r\n"));
        assert!(has_head_end(b"GET / HTTP/1.0\n\n"));
        assert!(!has_head_end(b"GET / HTTP/1.1\r\nHost: x\r\n"));
    }

    #[tokio::test]
    async fn test_read_request_eof() {
        let mut mock = Builder::new().build();

        assert!(read_request(&mut mock, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_request_error() {
        let mut mock = Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();

        assert!(read_request(&mut mock, 1024).await.is_err());
    }
}
