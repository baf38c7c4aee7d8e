//! Protocol constants

use std::time::Duration;

/// Boundary line that opens each part
pub const BOUNDARY_LINE: &[u8] = b"--frame\r\n";

/// Content type of each part
pub const PART_CONTENT_TYPE: &str = "image/jpeg";

/// Line terminator
pub const CRLF: &[u8] = b"\r\n";

/// Response head sent once before the first part
pub const RESPONSE_PREAMBLE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
Cache-Control: no-cache\r\n\
Connection: close\r\n\
Access-Control-Allow-Origin: *\r\n\
\r\n";

/// Default listening port
pub const DEFAULT_PORT: u16 = 8080;

/// Default JPEG quality (0-100)
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Per-client pacing interval (~30 fps)
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Sleep while no frame has been published yet
pub const DEFAULT_EMPTY_FRAME_BACKOFF: Duration = Duration::from_millis(10);

/// Sleep after a failed encode
pub const DEFAULT_ENCODE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Bytes read for the initial request
pub const DEFAULT_REQUEST_BUFFER_SIZE: usize = 1024;

/// Most request bytes consumed before streaming starts
pub const MAX_REQUEST_HEAD: usize = 64 * 1024;
