//! Streaming encryption and decryption
//!
//! Content is never held in memory as a whole. Readers are pulled one chunk
//! at a time, encrypted lazily, and may be split with [`tee`] so that one
//! pass over a source feeds several consumers.

use crate::{
    hashing::{hash_stream, Blake3Hash},
    keys::EncryptionKey,
    symmetric::{ChunkCipher, TAG_SIZE},
    CryptoError, Result, CHUNK_SIZE, ENCRYPTED_CHUNK_SIZE,
};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Boxed stream of byte chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Chunks buffered per tee branch before the source is paused
pub const DEFAULT_TEE_CAPACITY: usize = 4;

/// Fill `buf` from `reader`, stopping early only at end of input.
///
/// Returns the number of bytes read; anything less than `buf.len()` means
/// the reader is exhausted.
pub async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Lazily split a reader into chunks of exactly `chunk_size` bytes (the last may be shorter).
pub fn chunk_stream<R>(reader: R, chunk_size: usize) -> ByteStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = vec![0u8; chunk_size.max(1)];
    futures::stream::try_unfold((reader, buffer), |(mut reader, mut buffer)| async move {
        let n = read_chunk(&mut reader, &mut buffer).await?;
        if n == 0 {
            return Ok(None);
        }
        let chunk = Bytes::copy_from_slice(&buffer[..n]);
        Ok(Some((chunk, (reader, buffer))))
    })
    .boxed()
}

/// Encrypt a stream of plaintext chunks, numbering them from `first_index`.
///
/// Each input item is sealed as one chunk, so the input must already be
/// framed at [`CHUNK_SIZE`].
pub fn encrypt_chunks<S>(chunks: S, key: &EncryptionKey, first_index: u32) -> ByteStream
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    let cipher = ChunkCipher::new(key);
    let mut next = Some(first_index);
    chunks
        .map(move |chunk| {
            let chunk = chunk?;
            let index = next.ok_or_else(|| CryptoError::ChunkIndexOverflow.into_io())?;
            let sealed = cipher
                .encrypt_chunk(index, &chunk)
                .map_err(CryptoError::into_io)?;
            next = index.checked_add(1);
            Ok(Bytes::from(sealed))
        })
        .boxed()
}

/// Lazily encrypt everything `reader` yields.
///
/// Starting at a non-zero `first_index` produces exactly the tail of the
/// full encryption, provided the reader is positioned at
/// `first_index * CHUNK_SIZE`.
pub fn encrypt_stream<R>(reader: R, key: &EncryptionKey, first_index: u32) -> ByteStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    encrypt_chunks(chunk_stream(reader, CHUNK_SIZE), key, first_index)
}

/// Ciphertext length for a plaintext of `plain_size` bytes
pub fn encrypted_size(plain_size: u64) -> u64 {
    let chunks = plain_size.div_ceil(CHUNK_SIZE as u64);
    plain_size + chunks * TAG_SIZE as u64
}

/// One side of a [`tee`]
pub struct TeeBranch {
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl Stream for TeeBranch {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Split one stream into two independent readers.
///
/// Each branch buffers at most `capacity` chunks, so the slower branch paces
/// the source. Dropping one branch leaves the other running. A source error
/// is delivered to both branches and ends the stream.
pub fn tee<S>(stream: S, capacity: usize) -> (TeeBranch, TeeBranch)
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    let (left_tx, left_rx) = mpsc::channel(capacity.max(1));
    let (right_tx, right_rx) = mpsc::channel(capacity.max(1));

    tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        let mut left = Some(left_tx);
        let mut right = Some(right_tx);

        while let Some(item) = stream.next().await {
            let failed = item.is_err();
            let (for_left, for_right) = match item {
                Ok(bytes) => (Ok(bytes.clone()), Ok(bytes)),
                Err(e) => (Err(io::Error::new(e.kind(), e.to_string())), Err(e)),
            };

            if let Some(tx) = &left {
                if tx.send(for_left).await.is_err() {
                    left = None;
                }
            }
            if let Some(tx) = &right {
                if tx.send(for_right).await.is_err() {
                    right = None;
                }
            }
            if failed || (left.is_none() && right.is_none()) {
                break;
            }
        }
    });

    (TeeBranch { rx: left_rx }, TeeBranch { rx: right_rx })
}

/// Hashes and sizes of a plaintext and its encryption
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncryptionDigest {
    pub plain_hash: Blake3Hash,
    pub plain_size: u64,
    pub encrypted_hash: Blake3Hash,
    pub encrypted_size: u64,
}

/// Hash a source and its encryption under `key` in a single read.
pub async fn hash_plain_and_encrypted<R>(reader: R, key: &EncryptionKey) -> io::Result<EncryptionDigest>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (plain, to_encrypt) = tee(chunk_stream(reader, CHUNK_SIZE), DEFAULT_TEE_CAPACITY);
    let encrypted = encrypt_chunks(to_encrypt, key, 0);

    let ((plain_hash, plain_size), (encrypted_hash, encrypted_size)) =
        futures::try_join!(hash_stream(plain), hash_stream(encrypted))?;

    Ok(EncryptionDigest {
        plain_hash,
        plain_size,
        encrypted_hash,
        encrypted_size,
    })
}

/// Re-frames arbitrarily split ciphertext into chunks and decrypts them in order.
pub struct ChunkDecryptor {
    cipher: ChunkCipher,
    buffer: BytesMut,
    /// `None` once chunk `u32::MAX` has been opened
    next_index: Option<u32>,
}

impl ChunkDecryptor {
    /// Create a decryptor starting at chunk 0
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: ChunkCipher::new(key),
            buffer: BytesMut::with_capacity(ENCRYPTED_CHUNK_SIZE),
            next_index: Some(0),
        }
    }

    /// Feed ciphertext; returns every plaintext chunk that became complete
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);
        let mut out = Vec::new();
        while self.buffer.len() >= ENCRYPTED_CHUNK_SIZE {
            let chunk = self.buffer.split_to(ENCRYPTED_CHUNK_SIZE);
            out.push(self.open(&chunk)?);
        }
        Ok(out)
    }

    /// Decrypt the trailing short chunk, if any
    pub fn finish(mut self) -> Result<Option<Bytes>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let chunk = self.buffer.split();
        self.open(&chunk).map(Some)
    }

    /// Number of chunks decrypted so far
    pub fn chunks_decrypted(&self) -> u64 {
        self.next_index.map_or(u64::from(u32::MAX) + 1, u64::from)
    }

    fn open(&mut self, chunk: &[u8]) -> Result<Bytes> {
        let index = self.next_index.ok_or(CryptoError::ChunkIndexOverflow)?;
        let plain = self.cipher.decrypt_chunk(index, chunk)?;
        self.next_index = index.checked_add(1);
        Ok(Bytes::from(plain))
    }
}
