//! Error types for the wraith engine.

use std::io;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while executing a request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed JA3 / Akamai text or an unusable proxy specification.
    #[error("config error: {0}")]
    Config(String),

    /// TCP connect or proxy handshake failure.
    #[error("dial error: {0}")]
    Dial(String),

    /// TLS handshake or fingerprint application failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP/1.1 or HTTP/2 protocol violation (frame decode, HPACK,
    /// GOAWAY with an error code, RST_STREAM before headers, body over
    /// the read limit).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Redirect limit exceeded or unusable Location.
    #[error("redirect error: {0}")]
    Redirect(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Deadline exceeded.
    #[error("timed out: {0}")]
    Timeout(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn dial(message: impl Into<String>) -> Self {
        Self::Dial(message.into())
    }

    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn redirect(message: impl Into<String>) -> Self {
        Self::Redirect(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }
}
