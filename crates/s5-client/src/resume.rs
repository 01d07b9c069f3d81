//! Previous-upload storage for resuming interrupted tus uploads
//!
//! A record maps an upload fingerprint to the tus URL the portal assigned.
//! Keys are never stored here; an encrypted upload can only be resumed by a
//! caller that supplies the same key again.

use crate::{ClientError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use s5_crypto::Multihash;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// A tus upload that was created but possibly not finished
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviousUpload {
    pub fingerprint: String,
    pub upload_url: String,
    pub creation_time: DateTime<Utc>,
    pub size: u64,
}

/// Fingerprint identifying the same bytes sent under the same name
pub fn fingerprint(upload_hash: &Multihash, upload_size: u64, filename: &str) -> String {
    format!(
        "s5-tus::{}::{}::{}",
        upload_hash.to_base64url(),
        upload_size,
        filename
    )
}

/// Where previous-upload records live
#[async_trait]
pub trait UrlStorage: Send + Sync {
    /// Records for a fingerprint, most recent first
    async fn find_uploads_by_fingerprint(&self, fingerprint: &str) -> Result<Vec<PreviousUpload>>;

    /// Every stored record
    async fn find_all_uploads(&self) -> Result<Vec<PreviousUpload>>;

    /// Store a record
    async fn add_upload(&self, upload: PreviousUpload) -> Result<()>;

    /// Remove a record
    async fn remove_upload(&self, fingerprint: &str, upload_url: &str) -> Result<()>;
}

fn most_recent_first(mut uploads: Vec<PreviousUpload>) -> Vec<PreviousUpload> {
    uploads.sort_by(|a, b| b.creation_time.cmp(&a.creation_time));
    uploads
}

/// In-process storage; records are lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryUrlStorage {
    uploads: Mutex<Vec<PreviousUpload>>,
}

impl MemoryUrlStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UrlStorage for MemoryUrlStorage {
    async fn find_uploads_by_fingerprint(&self, fingerprint: &str) -> Result<Vec<PreviousUpload>> {
        let found = self
            .uploads
            .lock()
            .iter()
            .filter(|u| u.fingerprint == fingerprint)
            .cloned()
            .collect();
        Ok(most_recent_first(found))
    }

    async fn find_all_uploads(&self) -> Result<Vec<PreviousUpload>> {
        Ok(most_recent_first(self.uploads.lock().clone()))
    }

    async fn add_upload(&self, upload: PreviousUpload) -> Result<()> {
        let mut uploads = self.uploads.lock();
        uploads.retain(|u| !(u.fingerprint == upload.fingerprint && u.upload_url == upload.upload_url));
        uploads.push(upload);
        Ok(())
    }

    async fn remove_upload(&self, fingerprint: &str, upload_url: &str) -> Result<()> {
        self.uploads
            .lock()
            .retain(|u| !(u.fingerprint == fingerprint && u.upload_url == upload_url));
        Ok(())
    }
}

/// JSON file storage so uploads can be resumed by a later process
pub struct FileUrlStorage {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileUrlStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<PreviousUpload>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ClientError::InvalidResponse(format!(
                    "corrupt upload storage {}: {e}",
                    self.path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, uploads: &[PreviousUpload]) -> Result<()> {
        let json = serde_json::to_vec_pretty(uploads)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), records = uploads.len(), "Saved upload records");
        Ok(())
    }
}

#[async_trait]
impl UrlStorage for FileUrlStorage {
    async fn find_uploads_by_fingerprint(&self, fingerprint: &str) -> Result<Vec<PreviousUpload>> {
        let _guard = self.lock.lock().await;
        let found = self
            .load()
            .await?
            .into_iter()
            .filter(|u| u.fingerprint == fingerprint)
            .collect();
        Ok(most_recent_first(found))
    }

    async fn find_all_uploads(&self) -> Result<Vec<PreviousUpload>> {
        let _guard = self.lock.lock().await;
        Ok(most_recent_first(self.load().await?))
    }

    async fn add_upload(&self, upload: PreviousUpload) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut uploads = self.load().await?;
        uploads.retain(|u| !(u.fingerprint == upload.fingerprint && u.upload_url == upload.upload_url));
        uploads.push(upload);
        self.store(&uploads).await
    }

    async fn remove_upload(&self, fingerprint: &str, upload_url: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut uploads = self.load().await?;
        let before = uploads.len();
        uploads.retain(|u| !(u.fingerprint == fingerprint && u.upload_url == upload_url));
        if uploads.len() != before {
            self.store(&uploads).await?;
        }
        Ok(())
    }
}
