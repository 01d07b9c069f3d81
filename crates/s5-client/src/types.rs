//! Common types for the client SDK

use s5_crypto::EncryptionKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Result of a finished upload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    /// The CID to share; for encrypted uploads it carries the key
    pub cid: String,
    /// Base64url key, encrypted uploads only
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key: Option<String>,
    /// Encrypted CID with the key zeroed, encrypted uploads only
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cid_without_key: Option<String>,
}

/// Upload progress information
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadProgress {
    /// Bytes acknowledged by the portal so far
    pub bytes_uploaded: u64,
    /// Total bytes to upload
    pub total_bytes: u64,
}

impl UploadProgress {
    /// Get percentage complete
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_uploaded as f64 / self.total_bytes as f64) * 100.0
    }
}

/// Progress callback type
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Options for a single upload
#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Encrypt client-side before sending
    pub encrypt: bool,
    /// Reuse a key instead of generating one; needed to resume an encrypted upload
    pub encryption_key: Option<EncryptionKey>,
    /// Filename sent to the portal instead of the source's own
    pub custom_filename: Option<String>,
    /// Ask the portal not to store anything (small uploads only)
    pub dry_run: bool,
    /// Called after every acknowledged chunk
    pub progress: Option<ProgressCallback>,
    /// Overrides the configured resumable threshold
    pub large_file_size: Option<u64>,
}

impl UploadOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Encrypt with a fresh key
    pub fn encrypted(mut self) -> Self {
        self.encrypt = true;
        self
    }

    /// Encrypt with the given key
    pub fn with_encryption_key(mut self, key: EncryptionKey) -> Self {
        self.encrypt = true;
        self.encryption_key = Some(key);
        self
    }

    /// Set the filename sent to the portal
    pub fn with_filename(mut self, name: impl Into<String>) -> Self {
        self.custom_filename = Some(name.into());
        self
    }

    /// Enable dry run
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Set the progress callback
    pub fn with_progress(mut self, callback: impl Fn(UploadProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Override the resumable threshold
    pub fn with_large_file_size(mut self, size: u64) -> Self {
        self.large_file_size = Some(size);
        self
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("encrypt", &self.encrypt)
            .field("encryption_key", &self.encryption_key)
            .field("custom_filename", &self.custom_filename)
            .field("dry_run", &self.dry_run)
            .field("progress", &self.progress.is_some())
            .field("large_file_size", &self.large_file_size)
            .finish()
    }
}

/// Outcome of a verified download
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadStatus {
    /// Plain CID of the decrypted content
    pub cid: String,
    /// Where the plaintext was written
    pub path: PathBuf,
    /// Plaintext bytes written
    pub bytes_written: u64,
    /// Ciphertext bytes fetched and verified
    pub encrypted_size: u64,
}

/// Storage location lookup response
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageLocations {
    #[serde(default)]
    pub locations: Vec<StorageLocation>,
}

/// One place a blob can be fetched from
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageLocation {
    #[serde(default)]
    pub parts: Vec<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

impl StorageLocations {
    /// First part of the first location
    pub fn first_url(&self) -> Option<&str> {
        self.locations
            .first()
            .and_then(|l| l.parts.first())
            .map(String::as_str)
    }
}

/// Body returned by the multipart upload endpoint
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct PortalUploadResponse {
    #[serde(default)]
    pub cid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_result_serializes_camel_case() {
        let plain = UploadResult {
            cid: "uAAA".to_string(),
            key: None,
            cid_without_key: None,
        };
        assert_eq!(serde_json::to_string(&plain).unwrap(), r#"{"cid":"uAAA"}"#);

        let encrypted = UploadResult {
            cid: "uBBB".to_string(),
            key: Some("k".to_string()),
            cid_without_key: Some("uCCC".to_string()),
        };
        assert_eq!(
            serde_json::to_string(&encrypted).unwrap(),
            r#"{"cid":"uBBB","key":"k","cidWithoutKey":"uCCC"}"#
        );
    }

    #[test]
    fn test_progress_percentage() {
        let progress = UploadProgress {
            bytes_uploaded: 25,
            total_bytes: 100,
        };
        assert_eq!(progress.percentage(), 25.0);
        let empty = UploadProgress {
            bytes_uploaded: 0,
            total_bytes: 0,
        };
        assert_eq!(empty.percentage(), 100.0);
    }

    #[test]
    fn test_storage_locations_first_url() {
        let parsed: StorageLocations = serde_json::from_str(
            r#"{"locations":[{"type":3,"parts":["http://a/blob","http://b/blob"],"expiry":1}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.first_url(), Some("http://a/blob"));
        assert_eq!(StorageLocations::default().first_url(), None);
    }
}
