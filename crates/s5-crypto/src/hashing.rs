//! Hashing utilities using BLAKE3
//!
//! This module provides the content-addressing half of the SDK:
//! - One-shot and incremental BLAKE3 hashing
//! - Streaming hashing over `AsyncRead` sources and byte streams
//! - The S5 multihash form (`0x1f` + digest) used in CIDs and portal lookups

use crate::{CryptoError, Result, CHUNK_SIZE};
use base64::Engine;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of a BLAKE3 hash output in bytes (256 bits)
pub const HASH_BYTE_SIZE: usize = 32;

/// Multihash function id S5 uses for default BLAKE3
pub const MHASH_BLAKE3_DEFAULT: u8 = 0x1f;

/// Size of a BLAKE3 multihash (id byte + digest)
pub const MULTIHASH_BYTE_SIZE: usize = HASH_BYTE_SIZE + 1;

/// Type alias for hash output bytes
pub type HashOutput = [u8; HASH_BYTE_SIZE];

/// A BLAKE3 hash wrapper with convenience methods
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blake3Hash(HashOutput);

impl Blake3Hash {
    /// Create a new hash from bytes
    pub fn new(bytes: HashOutput) -> Self {
        Self(bytes)
    }

    /// Create a hash from a hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;
        if bytes.len() != HASH_BYTE_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "hash must be {} bytes, got {}",
                HASH_BYTE_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; HASH_BYTE_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Get the hash as bytes
    pub fn as_bytes(&self) -> &HashOutput {
        &self.0
    }

    /// Convert to a hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check if this hash is all zeros
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Wrap into the S5 multihash form
    pub fn to_multihash(&self) -> Multihash {
        Multihash::from_blake3(*self)
    }
}

impl Default for Blake3Hash {
    fn default() -> Self {
        Self([0u8; HASH_BYTE_SIZE])
    }
}

impl fmt::Debug for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blake3Hash({})", self.to_hex())
    }
}

impl fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Blake3Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<HashOutput> for Blake3Hash {
    fn from(bytes: HashOutput) -> Self {
        Self(bytes)
    }
}

impl From<Blake3Hash> for HashOutput {
    fn from(hash: Blake3Hash) -> Self {
        hash.0
    }
}

impl From<blake3::Hash> for Blake3Hash {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

/// A BLAKE3 digest tagged with its multihash function id.
///
/// This is the form S5 embeds in CIDs and the key portals index blobs by.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Multihash {
    bytes: [u8; MULTIHASH_BYTE_SIZE],
}

impl Multihash {
    /// Tag a BLAKE3 digest
    pub fn from_blake3(hash: Blake3Hash) -> Self {
        let mut bytes = [0u8; MULTIHASH_BYTE_SIZE];
        bytes[0] = MHASH_BLAKE3_DEFAULT;
        bytes[1..].copy_from_slice(hash.as_bytes());
        Self { bytes }
    }

    /// Parse 33 multihash bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != MULTIHASH_BYTE_SIZE {
            return Err(CryptoError::InvalidCid(format!(
                "multihash must be {} bytes, got {}",
                MULTIHASH_BYTE_SIZE,
                bytes.len()
            )));
        }
        if bytes[0] != MHASH_BLAKE3_DEFAULT {
            return Err(CryptoError::UnsupportedFormat(format!(
                "hash function 0x{:02x}",
                bytes[0]
            )));
        }
        let mut arr = [0u8; MULTIHASH_BYTE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Raw multihash bytes
    pub fn as_bytes(&self) -> &[u8; MULTIHASH_BYTE_SIZE] {
        &self.bytes
    }

    /// The digest without the function id
    pub fn digest(&self) -> Blake3Hash {
        let mut arr = [0u8; HASH_BYTE_SIZE];
        arr.copy_from_slice(&self.bytes[1..]);
        Blake3Hash::new(arr)
    }

    /// Base64url without padding, as used by portal endpoints
    pub fn to_base64url(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.bytes)
    }
}

impl fmt::Debug for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Multihash({})", self.to_base64url())
    }
}

impl fmt::Display for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64url())
    }
}

/// An incremental hasher for streaming data
pub struct IncrementalHasher {
    hasher: blake3::Hasher,
    bytes_processed: u64,
}

impl IncrementalHasher {
    /// Create a new incremental hasher
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
            bytes_processed: 0,
        }
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes_processed += data.len() as u64;
    }

    /// Finalize and return the hash
    pub fn finalize(&self) -> Blake3Hash {
        self.hasher.finalize().into()
    }

    /// Get the number of bytes processed
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Reset the hasher to initial state
    pub fn reset(&mut self) {
        self.hasher.reset();
        self.bytes_processed = 0;
    }
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash the given data using BLAKE3
pub fn hash(data: &[u8]) -> Blake3Hash {
    blake3::hash(data).into()
}

/// Hash multiple chunks of data
pub fn hash_chunks<I, D>(chunks: I) -> Blake3Hash
where
    I: IntoIterator<Item = D>,
    D: AsRef<[u8]>,
{
    let mut hasher = IncrementalHasher::new();
    for chunk in chunks {
        hasher.update(chunk.as_ref());
    }
    hasher.finalize()
}

/// Hash everything an async reader yields.
///
/// Memory is bounded by one `CHUNK_SIZE` buffer. Control is handed back to
/// the scheduler after every chunk so long hashes do not starve other tasks.
pub async fn hash_reader<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<(Blake3Hash, u64)> {
    let mut hasher = IncrementalHasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        tokio::task::yield_now().await;
    }
    Ok((hasher.finalize(), hasher.bytes_processed()))
}

/// Hash everything a byte stream yields.
pub async fn hash_stream<S>(mut stream: S) -> io::Result<(Blake3Hash, u64)>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    let mut hasher = IncrementalHasher::new();
    while let Some(chunk) = stream.next().await {
        hasher.update(&chunk?);
        tokio::task::yield_now().await;
    }
    Ok((hasher.finalize(), hasher.bytes_processed()))
}
