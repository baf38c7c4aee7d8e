//! Error types
//!
//! Only setup failures and double-start surface to callers. Per-connection
//! failures stay inside the connection task that hit them.

use std::net::SocketAddr;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error while setting up the server
    Io(std::io::Error),
    /// Listening socket could not be created, bound or put into listen mode
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    /// `start()` called while the server is already running
    AlreadyRunning,
    /// `start()` called outside a Tokio runtime
    NoRuntime,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Bind { addr, source } => write!(f, "Failed to bind {}: {}", addr, source),
            Error::AlreadyRunning => write!(f, "Server is already running"),
            Error::NoRuntime => write!(f, "No Tokio runtime available"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Bind { source, .. } => Some(source),
            Error::AlreadyRunning | Error::NoRuntime => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Frame encoding errors
///
/// Always treated as transient by connection handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Width/height do not match the buffer length
    InvalidDimensions {
        width: u32,
        height: u32,
        len: usize,
    },
    /// The underlying codec failed
    Codec(String),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeError::InvalidDimensions { width, height, len } => write!(
                f,
                "Invalid dimensions {}x{} for {} byte buffer",
                width, height, len
            ),
            EncodeError::Codec(msg) => write!(f, "Codec failure: {}", msg),
        }
    }
}

impl std::error::Error for EncodeError {}
