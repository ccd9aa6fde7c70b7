//! Error types for MIME parsing.

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a message can fail to parse.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input was empty.
    #[error("Empty message")]
    Empty,

    /// The header section contained no header fields.
    #[error("Invalid header section: {0}")]
    InvalidHeader(String),

    /// Content-Type could not be parsed.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// A transfer encoding was malformed.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Multipart content type without a boundary parameter.
    #[error("Missing boundary in multipart message")]
    MissingBoundary,

    /// Multipart body with no delimited parts.
    #[error("Invalid multipart structure: {0}")]
    InvalidMultipart(String),
}
