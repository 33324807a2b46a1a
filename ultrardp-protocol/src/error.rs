//! Error handling for the UltraRDP protocol
//!
//! All library operations return [`Result`], a type alias over
//! [`ProtocolError`]. Underlying library errors convert automatically via
//! `thiserror`'s `#[from]`.

use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// I/O error (network, file system)
    ///
    /// Automatically converted from `std::io::Error`. A short read while
    /// decoding a packet surfaces here and is fatal to the session.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encode/decode error
    ///
    /// Automatically converted from `image::ImageError`.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Invalid or malformed packet
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Declared payload length exceeds the sanity ceiling
    #[error("Payload size {0} exceeds maximum {1}")]
    PayloadExceeded(usize, usize),

    /// Malformed monitor configuration record
    #[error("Invalid monitor config: {0}")]
    InvalidMonitorConfig(String),

    /// Handshake did not complete as specified
    ///
    /// Fatal to the session: the connection is closed and no session is
    /// registered.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Screen capture back-end failure
    #[error("Capture error: {0}")]
    Capture(String),

    /// Operation attempted in the wrong state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::InvalidPacket("missing header".to_string());
        assert_eq!(err.to_string(), "Invalid packet: missing header");

        let err = ProtocolError::PayloadExceeded(128, 64);
        assert_eq!(err.to_string(), "Payload size 128 exceeds maximum 64");
    }

    #[test]
    fn io_error_converts() {
        fn short_read() -> Result<()> {
            Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "eof",
            ))?;
            Ok(())
        }
        assert!(matches!(short_read(), Err(ProtocolError::Io(_))));
    }
}
