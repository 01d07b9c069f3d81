//! Error types for the s5-crypto crate

use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    /// AEAD tag did not verify for a chunk
    #[error("authentication failed for chunk {chunk_index}")]
    Authentication { chunk_index: u32 },

    /// Encryption failed
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Invalid key format or length
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Malformed CID bytes or string
    #[error("invalid CID: {0}")]
    InvalidCid(String),

    /// Well-formed input using a type, hash or algorithm this crate does not support
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Hash verification failed
    #[error("hash verification failed: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// The u32 chunk counter would wrap and repeat a nonce
    #[error("chunk index overflow: more than {} chunks under one key", u64::from(u32::MAX) + 1)]
    ChunkIndexOverflow,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Base64 decode error
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Hex decode error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

impl CryptoError {
    /// Recover a `CryptoError` that was carried through an `std::io::Error`
    /// by one of the streaming adapters.
    pub fn from_io(err: std::io::Error) -> Self {
        let wraps_crypto = err
            .get_ref()
            .map_or(false, |inner| inner.is::<CryptoError>());
        if !wraps_crypto {
            return CryptoError::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<CryptoError>()) {
            Some(Ok(crypto)) => *crypto,
            Some(Err(other)) => CryptoError::Io(std::io::Error::new(std::io::ErrorKind::Other, other)),
            None => CryptoError::Encryption("empty io error".to_string()),
        }
    }

    /// Wrap into an `std::io::Error` so it can travel through byte streams.
    pub fn into_io(self) -> std::io::Error {
        match self {
            CryptoError::Io(err) => err,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
