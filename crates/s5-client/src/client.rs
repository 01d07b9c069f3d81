//! Main client implementation

use crate::{
    locations::{LocationCache, UnboundedLocationCache},
    request::{make_url, RequestBody, RequestConfig},
    resume::{MemoryUrlStorage, UrlStorage},
    types::StorageLocations,
    ClientError, Config, Result,
};
use reqwest::{header, Client, Response};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Header carrying the portal API key
pub const API_KEY_HEADER: &str = "S5-Api-Key";

/// S5 portal client.
///
/// Cheap to clone; clones share the HTTP connection pool, the previous-upload
/// storage and the location cache.
#[derive(Clone)]
pub struct S5Client {
    config: Arc<Config>,
    http: Client,
    url_storage: Arc<dyn UrlStorage>,
    location_cache: Arc<dyn LocationCache>,
}

impl S5Client {
    /// Create a new client with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            config
                .user_agent
                .parse()
                .map_err(|_| ClientError::Config(format!("invalid user agent: {}", config.user_agent)))?,
        );

        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            http,
            url_storage: Arc::new(MemoryUrlStorage::new()),
            location_cache: Arc::new(UnboundedLocationCache::new()),
        })
    }

    /// Create with portal URL
    pub fn with_portal(portal_url: &str) -> Result<Self> {
        Self::new(Config::new(portal_url))
    }

    /// Replace the previous-upload storage
    pub fn with_url_storage(mut self, storage: Arc<dyn UrlStorage>) -> Self {
        self.url_storage = storage;
        self
    }

    /// Replace the location cache
    pub fn with_location_cache(mut self, cache: Arc<dyn LocationCache>) -> Self {
        self.location_cache = cache;
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Previous-upload storage used for resumption
    pub fn url_storage(&self) -> &Arc<dyn UrlStorage> {
        &self.url_storage
    }

    /// Location cache used by downloads
    pub fn location_cache(&self) -> &Arc<dyn LocationCache> {
        &self.location_cache
    }

    /// Issue one request, adding the portal credentials.
    ///
    /// Non-success statuses become [`ClientError::Transport`] carrying the
    /// portal's message.
    #[instrument(skip(self, request), fields(method = %request.method))]
    pub async fn execute_request(&self, request: RequestConfig) -> Result<Response> {
        let url = request.build_url(self.config.base_url());
        let RequestConfig {
            method,
            query,
            headers,
            body,
            ..
        } = request;

        let mut req = self.http.request(method.clone(), &url);

        if let Some(token) = &self.config.auth_token {
            req = req.query(&[("auth_token", token)]);
        }
        if !query.is_empty() {
            req = req.query(&query);
        }
        if let Some(key) = &self.config.api_key {
            req = req.header(API_KEY_HEADER, key);
        }
        for (name, value) in headers {
            req = req.header(name, value);
        }

        req = match body {
            RequestBody::Empty => req,
            RequestBody::Bytes(data) => req.body(data),
            RequestBody::Multipart(form) => req.multipart(form),
        };

        debug!("Sending {} request to {}", method, url);
        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_else(|e| {
                debug!(error = %e, %status, "Failed to read error body");
                String::new()
            });
            return Err(ClientError::from_response(status.as_u16(), &text));
        }

        Ok(response)
    }

    /// Public URL a CID resolves at on the portal
    pub fn get_cid_url(&self, cid: &str) -> String {
        let url = make_url(self.config.base_url(), cid);
        match &self.config.auth_token {
            Some(token) => format!("{url}?auth_token={token}"),
            None => url,
        }
    }

    /// Look up where a blob is stored
    #[instrument(skip(self))]
    pub async fn storage_locations(&self, hash_b64: &str) -> Result<StorageLocations> {
        let request = RequestConfig::get(self.config.endpoint_storage_locations.clone())
            .extra_path(hash_b64)
            .query("types", self.config.storage_location_types.clone());
        let response = self.execute_request(request).await?;
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ClientError::InvalidResponse(format!("storage locations: {e}")))
    }

    /// Resolve a blob hash to a download URL, consulting the location cache first
    pub(crate) async fn resolve_download_url(&self, hash_b64: &str) -> Result<String> {
        if let Some(url) = self.location_cache.get(hash_b64) {
            debug!(hash = hash_b64, "Location cache hit");
            return Ok(url);
        }

        let locations = self.storage_locations(hash_b64).await?;
        let url = locations
            .first_url()
            .ok_or_else(|| ClientError::InvalidResponse(format!("no storage location for {hash_b64}")))?
            .to_string();
        self.location_cache.insert(hash_b64.to_string(), url.clone());
        Ok(url)
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }
}
