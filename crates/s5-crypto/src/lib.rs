//! # S5 Crypto
//!
//! Cryptographic primitives for the S5 client.
//!
//! This crate provides:
//! - **BLAKE3**: content addressing, one-shot and streaming
//! - **XChaCha20-Poly1305**: chunked encryption with index-derived nonces
//! - **CIDs**: the raw (`0x26`) and encrypted (`0xae`) S5 content identifiers
//! - **Streams**: pull-based encryption, a bounded tee, and in-order chunk decryption
//!
//! ## Chunk format
//!
//! Plaintext is split into 262144-byte chunks. Chunk `i` is sealed with a
//! 24-byte nonce holding `i` as a little-endian `u32` in its first four bytes
//! and zeros elsewhere, producing 262160 bytes of ciphertext per full chunk.
//! The final chunk may be shorter. An empty input encrypts to nothing.
//!
//! ## Example
//!
//! ```rust,ignore
//! use s5_crypto::{EncryptionKey, ChunkCipher, Cid, hashing};
//!
//! let key = EncryptionKey::generate();
//! let cipher = ChunkCipher::new(&key);
//! let sealed = cipher.encrypt_chunk(0, b"hello")?;
//! assert_eq!(cipher.decrypt_chunk(0, &sealed)?, b"hello");
//!
//! let cid = Cid::from_hash(hashing::hash(b"hello"), 5);
//! println!("{}", cid); // u...
//! ```

pub mod cid;
pub mod error;
pub mod hashing;
pub mod keys;
pub mod streaming;
pub mod symmetric;

pub use cid::{remove_key_from_encrypted_cid, Cid, EncryptedCid};
pub use error::{CryptoError, Result};
pub use hashing::{Blake3Hash, HashOutput, IncrementalHasher, Multihash};
pub use keys::{EncryptionKey, KEY_SIZE};
pub use streaming::{
    encrypt_stream, encrypted_size, hash_plain_and_encrypted, tee, ByteStream, ChunkDecryptor,
    EncryptionDigest, TeeBranch,
};
pub use symmetric::{decrypt_chunk, encrypt_chunk, ChunkCipher, Nonce, NONCE_SIZE, TAG_SIZE};

/// Log2 of the plaintext chunk size
pub const CHUNK_SIZE_POW2: u8 = 18;

/// Plaintext chunk size for streaming encryption (256 KiB)
pub const CHUNK_SIZE: usize = 1 << CHUNK_SIZE_POW2;

/// Ciphertext size of a full chunk
pub const ENCRYPTED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_SIZE;

/// Algorithm byte for XChaCha20-Poly1305 in encrypted CIDs
pub const ENCRYPTION_ALGORITHM_XCHACHA20_POLY1305: u8 = 0xa6;
