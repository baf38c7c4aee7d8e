//! Wire protocol: minimal HTTP handshake and multipart framing

pub mod constants;
pub mod handshake;
pub mod multipart;
