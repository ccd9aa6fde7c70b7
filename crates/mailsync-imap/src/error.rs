//! Error types for the IMAP client.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to an IMAP server.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Response could not be parsed.
    #[error("Parse error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Server returned NO.
    #[error("Server returned NO: {0}")]
    No(String),

    /// Server returned BAD.
    #[error("Server returned BAD: {0}")]
    Bad(String),

    /// Server sent BYE (disconnecting).
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Protocol violation or unexpected data.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Returns true if the error means the connection can no longer be used.
    ///
    /// `NO` and `BAD` are command-level failures; the session stays usable.
    #[must_use]
    pub const fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Tls(_) | Self::Bye(_) | Self::Timeout(_) | Self::Protocol(_)
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_faults() {
        let eof = Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed",
        ));
        assert!(eof.is_connection_fault());
        assert!(Error::Timeout(Duration::from_secs(1)).is_connection_fault());
        assert!(Error::Bye("shutting down".into()).is_connection_fault());
        assert!(!Error::No("[NONEXISTENT] no such mailbox".into()).is_connection_fault());
        assert!(!Error::Bad("bad syntax".into()).is_connection_fault());
    }
}
