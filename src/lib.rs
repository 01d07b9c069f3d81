//! # S5 SDK
//!
//! Facade over the S5 client workspace.
//!
//! - [`client`]: portal client, resumable uploads, verified downloads
//! - [`crypto`]: BLAKE3 content addressing, chunked XChaCha20-Poly1305, CID codec
//!
//! ```rust,ignore
//! use s5_sdk::client::{Config, S5Client, UploadOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = S5Client::new(Config::new("http://localhost:5050"))?;
//!
//!     let uploaded = client
//!         .upload_file("video.mp4", &UploadOptions::new().encrypted())
//!         .await?;
//!     println!("cid: {}", uploaded.cid);
//!
//!     client.download_decrypted(&uploaded.cid, "video.copy.mp4").await?;
//!     Ok(())
//! }
//! ```

pub use s5_client as client;
pub use s5_crypto as crypto;
