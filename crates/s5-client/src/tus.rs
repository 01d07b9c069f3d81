//! Minimal tus 1.0.0 client: creation, offset query and chunk PATCH

use crate::{
    request::{make_url, RequestBody, RequestConfig},
    ClientError, Result, S5Client,
};
use base64::Engine;
use bytes::Bytes;
use reqwest::{Method, Response};
use tracing::debug;

/// Protocol version sent on every request
pub const TUS_VERSION: &str = "1.0.0";

const TUS_RESUMABLE: &str = "Tus-Resumable";
const UPLOAD_OFFSET: &str = "Upload-Offset";
const UPLOAD_LENGTH: &str = "Upload-Length";
const UPLOAD_METADATA: &str = "Upload-Metadata";
const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";

/// Encode `Upload-Metadata`: comma separated `key base64(value)` pairs
pub fn encode_metadata(pairs: &[(&str, String)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| {
            format!(
                "{} {}",
                key,
                base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// tus operations against the client's portal
pub struct TusClient<'a> {
    client: &'a S5Client,
    endpoint: String,
}

impl<'a> TusClient<'a> {
    pub fn new(client: &'a S5Client) -> Self {
        let config = client.config();
        Self {
            client,
            endpoint: make_url(config.base_url(), &config.endpoint_large_upload),
        }
    }

    /// Creation endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Create an upload of `length` bytes; returns its absolute URL
    pub async fn create(&self, length: u64, metadata: &[(&str, String)]) -> Result<String> {
        let request = RequestConfig::new(Method::POST)
            .url(self.endpoint.clone())
            .header(TUS_RESUMABLE, TUS_VERSION)
            .header(UPLOAD_LENGTH, length.to_string())
            .header(UPLOAD_METADATA, encode_metadata(metadata));
        let response = self.client.execute_request(request).await?;

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ClientError::InvalidResponse("tus creation without Location".to_string()))?;
        let url = url::Url::parse(&self.endpoint)
            .and_then(|base| base.join(location))
            .map_err(|e| ClientError::InvalidResponse(format!("bad Location {location}: {e}")))?;

        debug!(upload_url = %url, length, "Created tus upload");
        Ok(url.into())
    }

    /// Offset the server has stored for an upload
    pub async fn head(&self, upload_url: &str) -> Result<u64> {
        let request = RequestConfig::new(Method::HEAD)
            .url(upload_url)
            .header(TUS_RESUMABLE, TUS_VERSION);
        let response = self.client.execute_request(request).await?;
        upload_offset(&response)
    }

    /// Send one chunk at `offset`; returns the new server offset
    pub async fn patch(&self, upload_url: &str, offset: u64, chunk: Bytes) -> Result<u64> {
        let len = chunk.len();
        let request = RequestConfig::new(Method::PATCH)
            .url(upload_url)
            .header(TUS_RESUMABLE, TUS_VERSION)
            .header(UPLOAD_OFFSET, offset.to_string())
            .header(reqwest::header::CONTENT_TYPE.as_str(), OFFSET_CONTENT_TYPE)
            .body(RequestBody::Bytes(chunk));
        let response = self.client.execute_request(request).await?;
        let new_offset = upload_offset(&response)?;
        debug!(offset, len, new_offset, "Patched chunk");
        Ok(new_offset)
    }
}

fn upload_offset(response: &Response) -> Result<u64> {
    response
        .headers()
        .get(UPLOAD_OFFSET)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| ClientError::InvalidResponse("missing Upload-Offset".to_string()))
}
