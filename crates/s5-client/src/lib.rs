//! # S5 Client SDK
//!
//! A client SDK for uploading to and downloading from S5 portals.
//!
//! ## Features
//!
//! - **Content addressed**: CIDs are computed locally before any byte is sent
//! - **Client-side encryption**: XChaCha20-Poly1305 in 256 KiB chunks
//! - **Resumable uploads**: large content goes through tus and survives restarts
//! - **Verified downloads**: ciphertext and plaintext are both checked against the CID
//!
//! ## Example
//!
//! ```rust,ignore
//! use s5_client::{Config, S5Client, UploadOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = S5Client::new(Config::from_env()?)?;
//!
//!     // Upload and encrypt a file
//!     let uploaded = client
//!         .upload_file("video.mp4", &UploadOptions::new().encrypted())
//!         .await?;
//!     println!("CID: {}", uploaded.cid);
//!
//!     // Fetch, verify and decrypt it again
//!     client.download_decrypted(&uploaded.cid, "video-copy.mp4").await?;
//!
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod download;
mod error;
mod locations;
mod request;
mod resume;
mod session;
mod tus;
mod types;
mod upload;

pub use client::{S5Client, API_KEY_HEADER};
pub use config::{Config, DEFAULT_LARGE_FILE_SIZE};
pub use error::{ClientError, ErrorKind, Result};
pub use locations::{LocationCache, LruLocationCache, UnboundedLocationCache};
pub use request::{RequestBody, RequestConfig};
pub use resume::{fingerprint, FileUrlStorage, MemoryUrlStorage, PreviousUpload, UrlStorage};
pub use session::{SessionState, UploadHandle};
pub use tus::{TusClient, TUS_VERSION};
pub use types::*;
pub use upload::{BytesSource, FileSource, SourceReader, UploadSource, ENCRYPTED_CONTENT_TYPE};

// Re-export the crypto types that appear in this crate's API
pub use s5_crypto::{Cid, EncryptedCid, EncryptionKey};
pub use tokio_util::sync::CancellationToken;
