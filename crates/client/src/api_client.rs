//! HTTP API client with normalized responses.

use std::sync::Arc;

use async_trait::async_trait;
use portcall_shared::{ApiResponse, SyncError};
use reqwest::Client;
use serde_json::Value;
use url::Url;

use crate::capabilities::{ErrorReporter, TracingReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        }
    }
}

/// An HTTP response before status mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Authenticated REST calls. Never fails past this boundary: transport
/// problems and unmapped responses are `None`.
#[async_trait]
pub trait Api: Send + Sync {
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        session_id: Option<&str>,
    ) -> Option<ApiResponse>;
}

pub const CLIENT_TIME_ZONE_HEADER: &str = "ClientTimeZone";

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    time_zone: Option<String>,
    reporter: Arc<dyn ErrorReporter>,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            time_zone: None,
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Time zone sent with authenticated calls.
    pub fn with_time_zone(mut self, time_zone: Option<String>) -> Self {
        self.time_zone = time_zone;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Resolve `path` against the API root. Paths are relative; a leading
    /// slash would silently drop any path prefix of the root.
    fn url(&self, path: &str) -> Result<Url, SyncError> {
        if path.starts_with('/') {
            return Err(SyncError::InvalidPath(path.to_string()));
        }
        let base = format!("{}/", self.base_url.trim_end_matches('/'));
        Url::parse(&base)
            .and_then(|base| base.join(path))
            .map_err(|e| SyncError::Transport(format!("bad url for {path}: {e}")))
    }

    /// Perform the HTTP request without interpreting the status.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        session_id: Option<&str>,
    ) -> Result<RawResponse, SyncError> {
        let url = self.url(path)?;
        let mut rb = self
            .client
            .request(method.as_reqwest(), url.clone())
            .header("Accept", "application/json")
            .header("Content-Type", "application/json");

        if let Some(session_id) = session_id.filter(|id| !id.is_empty()) {
            rb = rb.header("Authorization", format!("Bearer {session_id}"));
            if let Some(tz) = &self.time_zone {
                rb = rb.header(CLIENT_TIME_ZONE_HEADER, tz);
            }
        }
        if let Some(body) = body {
            rb = rb.body(serde_json::to_vec(body)?);
        }

        let resp = rb.send().await.map_err(SyncError::transport)?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| SyncError::Transport(format!("failed to read body: {e}")))?;

        Ok(RawResponse {
            url: url.to_string(),
            status,
            body,
        })
    }

    /// Map a raw response onto the normalized status contract.
    pub fn parse(&self, response: &RawResponse) -> Option<ApiResponse> {
        let body: Value = match serde_json::from_str(&response.body) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(url = %response.url, status = response.status, "response is not JSON");
                self.reporter.capture_error(&SyncError::from(e));
                return None;
            }
        };
        let parsed = ApiResponse::from_http(response.status, body);
        match &parsed {
            Some(r) if r.status == portcall_shared::ApiStatus::Error => {
                let message = r.message.as_deref().unwrap_or_default();
                tracing::warn!(url = %response.url, message, "server error");
                self.reporter.capture_message(message);
            }
            Some(_) => {}
            None => {
                tracing::warn!(url = %response.url, status = response.status, "request failed");
            }
        }
        parsed
    }
}

#[async_trait]
impl Api for ApiClient {
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        session_id: Option<&str>,
    ) -> Option<ApiResponse> {
        match self.send(method, path, body, session_id).await {
            Ok(raw) => self.parse(&raw),
            Err(e) => {
                tracing::warn!(path, error = %e, "api call failed");
                self.reporter.capture_error(&e);
                None
            }
        }
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("time_zone", &self.time_zone)
            .finish_non_exhaustive()
    }
}
