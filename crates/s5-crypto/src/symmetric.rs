//! Chunk encryption using XChaCha20-Poly1305
//!
//! Nonces are derived from the chunk index, so the same key must never seal
//! two different contents. Keys are generated fresh per upload unless the
//! caller reuses one to resume an interrupted upload of the same file.

use crate::{keys::EncryptionKey, CryptoError, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};

/// Size of an XChaCha20 nonce in bytes (192 bits)
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// A nonce for chunk encryption
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce {
    bytes: [u8; NONCE_SIZE],
}

impl Nonce {
    /// The nonce for chunk `index`: little-endian index in bytes 0..4, zeros after
    pub fn for_chunk(index: u32) -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        bytes[..4].copy_from_slice(&index.to_le_bytes());
        Self { bytes }
    }

    /// Get the nonce bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.bytes
    }
}

/// Seals and opens chunks under one key
#[derive(Clone)]
pub struct ChunkCipher {
    cipher: XChaCha20Poly1305,
}

impl ChunkCipher {
    /// Create a cipher for the given key
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.as_bytes().into()),
        }
    }

    /// Encrypt one chunk, appending the tag
    pub fn encrypt_chunk(&self, index: u32, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Nonce::for_chunk(index);
        self.cipher
            .encrypt(XNonce::from_slice(nonce.as_bytes()), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    /// Decrypt one chunk, failing with `Authentication` if the tag does not verify
    pub fn decrypt_chunk(&self, index: u32, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::Authentication { chunk_index: index });
        }
        let nonce = Nonce::for_chunk(index);
        self.cipher
            .decrypt(XNonce::from_slice(nonce.as_bytes()), ciphertext)
            .map_err(|_| CryptoError::Authentication { chunk_index: index })
    }
}

/// Encrypt a single chunk with a one-off cipher
pub fn encrypt_chunk(plaintext: &[u8], key: &EncryptionKey, index: u32) -> Result<Vec<u8>> {
    ChunkCipher::new(key).encrypt_chunk(index, plaintext)
}

/// Decrypt a single chunk with a one-off cipher
pub fn decrypt_chunk(ciphertext: &[u8], key: &EncryptionKey, index: u32) -> Result<Vec<u8>> {
    ChunkCipher::new(key).decrypt_chunk(index, ciphertext)
}
