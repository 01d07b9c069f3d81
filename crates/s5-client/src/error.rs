//! Client error types

use s5_crypto::CryptoError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network failure or non-success HTTP status
    #[error("transport error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// A ciphertext chunk failed to authenticate
    #[error("authentication failed for chunk {chunk_index}")]
    Authentication { chunk_index: u32 },

    /// Downloaded content does not match its CID
    #[error("integrity check failed: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    /// CID type, multibase or algorithm not supported
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Bad caller input
    #[error("validation error: {0}")]
    Validation(String),

    /// Upload stopped by its cancellation token
    #[error("upload cancelled at offset {offset}")]
    Cancelled { offset: u64 },

    /// Portal answered with something unexpected
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Other cryptographic error
    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    /// IO error
    #[error("IO error: {0}")]
    Io(std::io::Error),
}

/// Coarse error taxonomy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Authentication,
    Integrity,
    UnsupportedFormat,
    Validation,
    Cancelled,
    Other,
}

impl ClientError {
    /// Build a transport error from a non-success response body.
    ///
    /// The portal's JSON `message` field is preferred; otherwise the trimmed body text.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| body.trim().to_string());
        let message = if message.is_empty() {
            reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("request failed")
                .to_string()
        } else {
            message
        };

        Self::Transport {
            status: Some(status),
            message,
        }
    }

    /// Map to the coarse taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            _ => ErrorKind::Other,
        }
    }

    /// HTTP status, if the error came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether a resumable upload should try again after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { status: None, .. } => true,
            Self::Transport {
                status: Some(status),
                ..
            } => *status >= 500 || *status == 409 || *status == 423,
            _ => false,
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404) | Some(410))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<CryptoError> for ClientError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Authentication { chunk_index } => ClientError::Authentication { chunk_index },
            CryptoError::UnsupportedFormat(msg) => ClientError::UnsupportedFormat(msg),
            CryptoError::HashMismatch { expected, actual } => ClientError::Integrity { expected, actual },
            CryptoError::Io(err) => ClientError::Io(err),
            other => ClientError::Crypto(other),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        CryptoError::from_io(err).into()
    }
}
