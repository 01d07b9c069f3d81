//! Upload entry points, content preparation and the small-file path
//!
//! Every upload starts by hashing its source (and, when encrypting, its
//! ciphertext) so the CID is known before any byte is sent. Content below
//! the large-file threshold is then sent in one multipart POST; everything
//! else goes through a resumable [`UploadSession`](crate::session::UploadSession).

use crate::{
    request::{RequestBody, RequestConfig},
    resume,
    session::{UploadHandle, UploadSession},
    types::{PortalUploadResponse, UploadOptions, UploadResult},
    ClientError, Result, S5Client,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use s5_crypto::{
    hashing::hash_reader,
    streaming::{chunk_stream, encrypt_stream, hash_plain_and_encrypted, ByteStream},
    Cid, EncryptedCid, EncryptionKey, Multihash, CHUNK_SIZE, ENCRYPTED_CHUNK_SIZE,
};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncSeekExt};
use tracing::{debug, info, instrument, warn};

/// Content type sent for encrypted uploads
pub const ENCRYPTED_CONTENT_TYPE: &str = "application/octet-stream";

/// Boxed reader returned by [`UploadSource::open`]
pub type SourceReader = Box<dyn AsyncRead + Send + Unpin>;

/// Content that can be read more than once, from any offset
#[async_trait]
pub trait UploadSource: Send + Sync {
    /// Total size in bytes
    fn size(&self) -> u64;

    /// A reader positioned at `offset`
    async fn open(&self, offset: u64) -> io::Result<SourceReader>;
}

/// A regular file on disk
#[derive(Clone, Debug)]
pub struct FileSource {
    path: PathBuf,
    size: u64,
}

impl FileSource {
    /// Stat `path`; fails with `Validation` unless it is a regular file
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ClientError::Validation(format!("cannot read {}: {e}", path.display())))?;
        if !metadata.is_file() {
            return Err(ClientError::Validation(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final path component, used as the default upload filename
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string())
    }
}

#[async_trait]
impl UploadSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn open(&self, offset: u64) -> io::Result<SourceReader> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        Ok(Box::new(file))
    }
}

/// In-memory content
#[derive(Clone, Debug)]
pub struct BytesSource {
    data: Bytes,
}

impl BytesSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl UploadSource for BytesSource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn open(&self, offset: u64) -> io::Result<SourceReader> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.data.len());
        Ok(Box::new(io::Cursor::new(self.data.slice(start..))))
    }
}

/// Everything known about an upload before the first byte is sent
#[derive(Clone, Debug)]
pub(crate) struct PreparedUpload {
    pub plain_cid: Cid,
    pub encrypted: Option<EncryptedCid>,
    /// Multihash of the bytes actually transmitted
    pub upload_hash: Multihash,
    /// Number of bytes actually transmitted
    pub upload_size: u64,
    pub filename: String,
    pub filetype: String,
}

impl PreparedUpload {
    /// Hash the source, and its encryption when requested
    pub async fn prepare(source: &dyn UploadSource, filename: &str, options: &UploadOptions) -> Result<Self> {
        if options.encrypt {
            let key = options
                .encryption_key
                .clone()
                .unwrap_or_else(EncryptionKey::generate);
            let digest = hash_plain_and_encrypted(source.open(0).await?, &key).await?;
            ensure_size(source, digest.plain_size)?;

            let plain_cid = Cid::from_hash(digest.plain_hash, digest.plain_size);
            let upload_hash = digest.encrypted_hash.to_multihash();
            let encrypted = EncryptedCid::new(upload_hash, key, 0, plain_cid);

            Ok(Self {
                plain_cid,
                encrypted: Some(encrypted),
                upload_hash,
                upload_size: digest.encrypted_size,
                filename: filename.to_string(),
                filetype: ENCRYPTED_CONTENT_TYPE.to_string(),
            })
        } else {
            let (hash, size) = hash_reader(source.open(0).await?).await?;
            ensure_size(source, size)?;

            let plain_cid = Cid::from_hash(hash, size);
            Ok(Self {
                plain_cid,
                encrypted: None,
                upload_hash: *plain_cid.hash(),
                upload_size: size,
                filename: filename.to_string(),
                filetype: mime_guess::from_path(filename)
                    .first_or_octet_stream()
                    .to_string(),
            })
        }
    }

    pub fn key(&self) -> Option<&EncryptionKey> {
        self.encrypted.as_ref().map(|e| e.key())
    }

    /// The CID handed back to the caller
    pub fn cid(&self) -> String {
        match &self.encrypted {
            Some(encrypted) => encrypted.encode(),
            None => self.plain_cid.encode(),
        }
    }

    pub fn result(&self) -> UploadResult {
        match &self.encrypted {
            Some(encrypted) => UploadResult {
                cid: encrypted.encode(),
                key: Some(encrypted.key().to_base64url()),
                cid_without_key: Some(encrypted.to_keyless_string()),
            },
            None => UploadResult {
                cid: self.plain_cid.encode(),
                key: None,
                cid_without_key: None,
            },
        }
    }

    pub fn fingerprint(&self) -> String {
        resume::fingerprint(&self.upload_hash, self.upload_size, &self.filename)
    }

    /// Bytes per tus PATCH
    pub fn chunk_size(&self) -> usize {
        if self.encrypted.is_some() {
            ENCRYPTED_CHUNK_SIZE
        } else {
            CHUNK_SIZE
        }
    }

    pub fn tus_metadata(&self) -> Vec<(&'static str, String)> {
        vec![
            ("hash", self.upload_hash.to_base64url()),
            ("filename", self.filename.clone()),
            ("filetype", self.filetype.clone()),
        ]
    }

    /// The transmitted byte stream starting at `offset`, framed in [`chunk_size`](Self::chunk_size) pieces.
    ///
    /// Encrypted streams restart at the enclosing chunk boundary, re-encrypt
    /// from there and drop the bytes before `offset`.
    pub async fn open_body(&self, source: &dyn UploadSource, offset: u64) -> io::Result<ByteStream> {
        let Some(encrypted) = &self.encrypted else {
            return Ok(chunk_stream(source.open(offset).await?, CHUNK_SIZE));
        };

        let chunk_index = offset / ENCRYPTED_CHUNK_SIZE as u64;
        let skip = (offset % ENCRYPTED_CHUNK_SIZE as u64) as usize;
        let index = u32::try_from(chunk_index)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset beyond chunk index range"))?;

        let reader = source.open(chunk_index * CHUNK_SIZE as u64).await?;
        let stream = encrypt_stream(reader, encrypted.key(), index);
        if skip == 0 {
            return Ok(stream);
        }
        Ok(stream
            .enumerate()
            .map(move |(i, chunk)| match chunk {
                Ok(bytes) if i == 0 => Ok(bytes.slice(skip.min(bytes.len())..)),
                other => other,
            })
            .boxed())
    }
}

fn ensure_size(source: &dyn UploadSource, hashed: u64) -> Result<()> {
    if hashed != source.size() {
        return Err(ClientError::Validation(format!(
            "source changed while hashing: expected {} bytes, read {}",
            source.size(),
            hashed
        )));
    }
    Ok(())
}

impl S5Client {
    /// Upload in-memory data under `filename`
    #[instrument(skip(self, data, options), fields(size))]
    pub async fn upload_data(
        &self,
        data: impl Into<Bytes>,
        filename: &str,
        options: &UploadOptions,
    ) -> Result<UploadResult> {
        let source = Arc::new(BytesSource::new(data));
        tracing::Span::current().record("size", source.size());
        self.upload(source, filename, options).await
    }

    /// Upload a file from disk; the filename defaults to the path's last component
    #[instrument(skip(self, path, options), fields(path = %path.as_ref().display()))]
    pub async fn upload_file(&self, path: impl AsRef<Path>, options: &UploadOptions) -> Result<UploadResult> {
        let source = FileSource::new(path).await?;
        let filename = options
            .custom_filename
            .clone()
            .unwrap_or_else(|| source.file_name());
        self.upload(Arc::new(source), &filename, options).await
    }

    /// Upload any source, choosing the path by size
    pub async fn upload(
        &self,
        source: Arc<dyn UploadSource>,
        filename: &str,
        options: &UploadOptions,
    ) -> Result<UploadResult> {
        let threshold = options.large_file_size.unwrap_or(self.config().large_file_size);
        if source.size() < threshold {
            debug!(size = source.size(), threshold, "Using single request upload");
            self.upload_small(source.as_ref(), filename, options).await
        } else {
            debug!(size = source.size(), threshold, "Using resumable upload");
            self.start_upload(source, filename, options).await?.wait().await
        }
    }

    /// Send a source in one multipart POST
    #[instrument(skip(self, source, options), fields(size = source.size()))]
    pub async fn upload_small(
        &self,
        source: &dyn UploadSource,
        filename: &str,
        options: &UploadOptions,
    ) -> Result<UploadResult> {
        let filename = options.custom_filename.as_deref().unwrap_or(filename);
        let prepared = PreparedUpload::prepare(source, filename, options).await?;

        let body = reqwest::Body::wrap_stream(prepared.open_body(source, 0).await?);
        let part = Part::stream_with_length(body, prepared.upload_size)
            .file_name(prepared.filename.clone())
            .mime_str(&prepared.filetype)?;
        let form = Form::new().part(self.config().portal_file_fieldname.clone(), part);

        let mut request = RequestConfig::post(self.config().endpoint_upload.clone())
            .body(RequestBody::Multipart(form));
        if options.dry_run {
            request = request.query("dryrun", "true");
        }

        let response = self.execute_request(request).await?;
        let text = response.text().await?;
        let result = prepared.result();

        if prepared.encrypted.is_none() {
            match serde_json::from_str::<PortalUploadResponse>(&text) {
                Ok(PortalUploadResponse { cid: Some(portal_cid) })
                    if Cid::decode(&portal_cid).map(|c| c.hash() != &prepared.upload_hash).unwrap_or(false) =>
                {
                    warn!(portal_cid = %portal_cid, local_cid = %result.cid, "Portal reported a different CID");
                }
                _ => {}
            }
        }

        info!(cid = %result.cid, size = prepared.upload_size, "Upload complete");
        Ok(result)
    }

    /// Hash the source and start a resumable upload in the background.
    ///
    /// The CID and key are known as soon as this returns; the transfer itself
    /// is driven by the returned handle's task.
    pub async fn start_upload(
        &self,
        source: Arc<dyn UploadSource>,
        filename: &str,
        options: &UploadOptions,
    ) -> Result<UploadHandle> {
        let filename = options.custom_filename.as_deref().unwrap_or(filename);
        let prepared = PreparedUpload::prepare(source.as_ref(), filename, options).await?;
        info!(
            fingerprint = %prepared.fingerprint(),
            size = prepared.upload_size,
            encrypted = prepared.encrypted.is_some(),
            "Prepared resumable upload"
        );
        let session = UploadSession::new(self.clone(), source, prepared, options.progress.clone());
        Ok(session.spawn())
    }
}
