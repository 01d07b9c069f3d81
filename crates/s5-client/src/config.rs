//! Client configuration

use crate::{ClientError, Result};
use std::time::Duration;

/// Uploads at or above this size go through the resumable tus path (32 MiB)
pub const DEFAULT_LARGE_FILE_SIZE: u64 = 32 * 1024 * 1024;

/// Client configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Portal base URL
    pub portal_url: String,
    /// Sent as the `S5-Api-Key` header
    pub api_key: Option<String>,
    /// Sent as the `auth_token` query parameter
    pub auth_token: Option<String>,
    /// User agent string
    pub user_agent: String,
    /// TCP connect timeout; requests themselves have no deadline
    pub connect_timeout: Duration,
    /// Multipart upload endpoint
    pub endpoint_upload: String,
    /// tus creation endpoint
    pub endpoint_large_upload: String,
    /// Blob download endpoint, the CID is appended
    pub endpoint_download: String,
    /// Storage location lookup endpoint, the hash is appended
    pub endpoint_storage_locations: String,
    /// `types` query for storage location lookups
    pub storage_location_types: String,
    /// Size threshold for resumable uploads
    pub large_file_size: u64,
    /// Delay before each retry of a failed tus request; the length is the attempt limit
    pub retry_delays: Vec<Duration>,
    /// Give up retrying once this much time has passed since the first failure
    pub max_retry_window: Duration,
    /// Multipart form field carrying the file
    pub portal_file_fieldname: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            portal_url: "http://localhost:5522".to_string(),
            api_key: None,
            auth_token: None,
            user_agent: format!("s5-client/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(30),
            endpoint_upload: "/s5/upload".to_string(),
            endpoint_large_upload: "/s5/upload/tus".to_string(),
            endpoint_download: "/s5/blob/".to_string(),
            endpoint_storage_locations: "/s5/debug/storage_locations".to_string(),
            storage_location_types: "3,5".to_string(),
            large_file_size: DEFAULT_LARGE_FILE_SIZE,
            retry_delays: [0, 5, 15, 60, 300, 600]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            max_retry_window: Duration::from_secs(20 * 60),
            portal_file_fieldname: "file".to_string(),
        }
    }
}

impl Config {
    /// Create a new config for the given portal
    pub fn new(portal_url: impl Into<String>) -> Self {
        Self {
            portal_url: portal_url.into(),
            ..Default::default()
        }
    }

    /// Load from the environment, reading a `.env` file first if present.
    ///
    /// Recognises `S5_PORTAL_URL`, `S5_API_KEY`, `S5_AUTH_TOKEN` and
    /// `S5_LARGE_FILE_SIZE`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(url) = get("S5_PORTAL_URL") {
            config.portal_url = url;
        }
        config.api_key = get("S5_API_KEY").filter(|v| !v.is_empty());
        config.auth_token = get("S5_AUTH_TOKEN").filter(|v| !v.is_empty());
        if let Some(size) = get("S5_LARGE_FILE_SIZE") {
            config.large_file_size = size.trim().parse().map_err(|_| {
                ClientError::Config(format!("S5_LARGE_FILE_SIZE is not a byte count: {size}"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the API key
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the account auth token
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set the resumable upload threshold
    pub fn with_large_file_size(mut self, size: u64) -> Self {
        self.large_file_size = size;
        self
    }

    /// Set the retry schedule
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Set the total retry window
    pub fn with_max_retry_window(mut self, window: Duration) -> Self {
        self.max_retry_window = window;
        self
    }

    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Check that the portal URL parses and the threshold is usable
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.portal_url)
            .map_err(|e| ClientError::Config(format!("invalid portal URL {}: {e}", self.portal_url)))?;
        if self.large_file_size == 0 {
            return Err(ClientError::Config("large_file_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Build the base URL for API requests
    pub fn base_url(&self) -> &str {
        self.portal_url.trim_end_matches('/')
    }
}
