//! Request description for the HTTP execution primitive

use bytes::Bytes;
use reqwest::Method;

/// Body of a portal request
#[derive(Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
    Multipart(reqwest::multipart::Form),
}

/// Everything needed to issue one portal request.
///
/// The target is `url` when set, otherwise the configured portal URL. The
/// endpoint path and extra path are appended in that order.
pub struct RequestConfig {
    pub method: Method,
    pub url: Option<String>,
    pub endpoint_path: Option<String>,
    pub extra_path: Option<String>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl RequestConfig {
    /// Request against the portal
    pub fn new(method: Method) -> Self {
        Self {
            method,
            url: None,
            endpoint_path: None,
            extra_path: None,
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// GET an endpoint on the portal
    pub fn get(endpoint_path: impl Into<String>) -> Self {
        Self::new(Method::GET).endpoint(endpoint_path)
    }

    /// POST to an endpoint on the portal
    pub fn post(endpoint_path: impl Into<String>) -> Self {
        Self::new(Method::POST).endpoint(endpoint_path)
    }

    /// Target an absolute URL instead of the portal
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn endpoint(mut self, path: impl Into<String>) -> Self {
        self.endpoint_path = Some(path.into());
        self
    }

    pub fn extra_path(mut self, path: impl Into<String>) -> Self {
        self.extra_path = Some(path.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Resolve the target URL, without the query string
    pub fn build_url(&self, portal_url: &str) -> String {
        let mut url = self.url.clone().unwrap_or_else(|| portal_url.to_string());
        if let Some(path) = &self.endpoint_path {
            url = make_url(&url, path);
        }
        if let Some(path) = &self.extra_path {
            url = make_url(&url, path);
        }
        url
    }
}

/// Join a base URL and a path with exactly one slash between them
pub fn make_url(base: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path)
}
