//! Downloads: plain blobs and the verified decrypt pipeline
//!
//! An encrypted download is fetched once, hashed while it is spooled to an
//! anonymous temp file, and only decrypted after the ciphertext hash matches
//! the CID. Plaintext goes to a temp file beside the destination that is
//! renamed into place after its own hash is checked.

use crate::{
    locations::LocationCache,
    request::RequestConfig,
    types::DownloadStatus,
    ClientError, Result, S5Client,
};
use bytes::Bytes;
use futures::StreamExt;
use s5_crypto::{
    hashing::{hash_stream, IncrementalHasher},
    streaming::{read_chunk, tee, ChunkDecryptor, DEFAULT_TEE_CAPACITY},
    CryptoError, EncryptedCid, Multihash, ENCRYPTED_CHUNK_SIZE,
};
use std::io::{self, SeekFrom};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

impl S5Client {
    /// Download an encrypted CID, verify it and write the plaintext to `destination`.
    ///
    /// Nothing is created at `destination` unless both the ciphertext and the
    /// plaintext hashes match the CID.
    #[instrument(skip(self, cid, destination), fields(destination = %destination.as_ref().display()))]
    pub async fn download_decrypted(&self, cid: &str, destination: impl AsRef<Path>) -> Result<DownloadStatus> {
        let destination = destination.as_ref();
        let encrypted = EncryptedCid::decode(cid)?;
        if !encrypted.has_key() {
            return Err(ClientError::Validation("CID does not carry a decryption key".to_string()));
        }

        let hash_b64 = encrypted.encrypted_hash().to_base64url();
        let url = self.resolve_download_url(&hash_b64).await?;
        debug!(hash = %hash_b64, url = %url, "Fetching encrypted blob");

        let (mut spool, encrypted_size) = match self.fetch_verified(&url, encrypted.encrypted_hash()).await {
            Ok(fetched) => fetched,
            Err(e) => {
                if e.is_not_found() {
                    self.location_cache().remove(&hash_b64);
                }
                return Err(e);
            }
        };

        spool.seek(SeekFrom::Start(0)).await?;
        let dir = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let staging = tempfile::NamedTempFile::new_in(dir)?;
        let mut out = File::from_std(staging.as_file().try_clone()?);

        let expected = encrypted.original();
        let mut decryptor = ChunkDecryptor::new(encrypted.key());
        let mut hasher = IncrementalHasher::new();
        let mut writer = PlainWriter {
            out: &mut out,
            hasher: &mut hasher,
            remaining: expected.size(),
        };

        let mut buf = vec![0u8; ENCRYPTED_CHUNK_SIZE];
        loop {
            let n = read_chunk(&mut spool, &mut buf).await?;
            if n == 0 {
                break;
            }
            for plain in decryptor.push(&buf[..n])? {
                writer.write(&plain).await?;
            }
        }
        if let Some(plain) = decryptor.finish()? {
            writer.write(&plain).await?;
        }
        if writer.remaining > 0 {
            return Err(ClientError::Integrity {
                expected: format!("{} plaintext bytes", expected.size()),
                actual: format!("{} bytes", expected.size() - writer.remaining),
            });
        }

        let actual = hasher.finalize().to_multihash();
        if &actual != expected.hash() {
            return Err(CryptoError::HashMismatch {
                expected: expected.hash().to_base64url(),
                actual: actual.to_base64url(),
            }
            .into());
        }

        out.flush().await?;
        out.sync_all().await?;
        drop(out);
        staging
            .persist(destination)
            .map_err(|e| ClientError::Io(e.error))?;

        info!(cid = %expected, bytes = expected.size(), encrypted_size, "Download verified");
        Ok(DownloadStatus {
            cid: expected.encode(),
            path: destination.to_path_buf(),
            bytes_written: expected.size(),
            encrypted_size,
        })
    }

    /// Fetch a blob into an anonymous spool file, checking its hash on the way
    async fn fetch_verified(&self, url: &str, expected: &Multihash) -> Result<(File, u64)> {
        let response = self.http().get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_else(|e| {
                debug!(error = %e, "Failed to read error body");
                String::new()
            });
            return Err(ClientError::from_response(status.as_u16(), &text));
        }

        let body = response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other));
        let (to_hash, mut to_spool) = tee(body, DEFAULT_TEE_CAPACITY);
        let mut spool = File::from_std(tempfile::tempfile()?);

        let spool_all = async {
            let mut written = 0u64;
            while let Some(chunk) = to_spool.next().await {
                let chunk = chunk?;
                spool.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            spool.flush().await?;
            Ok::<_, io::Error>(written)
        };
        let ((actual, hashed), spooled) = futures::try_join!(hash_stream(to_hash), spool_all)?;
        debug_assert_eq!(hashed, spooled);

        let actual = actual.to_multihash();
        if &actual != expected {
            warn!(expected = %expected.to_base64url(), actual = %actual.to_base64url(), "Blob hash mismatch");
            return Err(CryptoError::HashMismatch {
                expected: expected.to_base64url(),
                actual: actual.to_base64url(),
            }
            .into());
        }
        Ok((spool, hashed))
    }

    /// Download a blob by CID into memory
    #[instrument(skip(self))]
    pub async fn download_data(&self, cid: &str) -> Result<Bytes> {
        let request = RequestConfig::get(self.config().endpoint_download.clone()).extra_path(cid);
        let response = self.execute_request(request).await?;
        Ok(response.bytes().await?)
    }

    /// Download a blob by CID into a file; returns the bytes written
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn download_file(&self, path: impl AsRef<Path>, cid: &str) -> Result<u64> {
        let request = RequestConfig::get(self.config().endpoint_download.clone()).extra_path(cid);
        let response = self.execute_request(request).await?;

        let mut file = File::create(path.as_ref()).await?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(written, "Blob saved");
        Ok(written)
    }
}

/// Writes decrypted chunks, dropping everything past the plaintext size
struct PlainWriter<'a> {
    out: &'a mut File,
    hasher: &'a mut IncrementalHasher,
    remaining: u64,
}

impl PlainWriter<'_> {
    async fn write(&mut self, plain: &[u8]) -> io::Result<()> {
        let take = (plain.len() as u64).min(self.remaining) as usize;
        if take == 0 {
            return Ok(());
        }
        self.hasher.update(&plain[..take]);
        self.out.write_all(&plain[..take]).await?;
        self.remaining -= take as u64;
        Ok(())
    }
}
