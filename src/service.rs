// External service contract and its HTTP implementation.
//
// The web service is a black box behind four routes (plus the control
// route): metadata lookup, download start, progress, and file retrieval.
// Everything above this module talks to the `DownloadService` trait so tests
// can substitute a scripted in-memory service.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::ClientError;
use crate::format::{normalize_rate, parse_percent};
use crate::models::{ProgressSnapshot, VideoDescriptor};

/// Raw progress report from `GET progress/{client_id}`.
///
/// The service serializes percent, speed and eta as pre-formatted display
/// strings ("42.3%", "420.30KiB/s", "12:32") and does not promise a stable
/// numeric encoding, so they stay opaque here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub percent: String,
    #[serde(default)]
    pub speed: String,
    #[serde(default)]
    pub eta: String,
}

impl ProgressUpdate {
    /// Convert the wire strings into the snapshot the session tracks:
    /// percent parsed leniently, rate labels normalized, eta left opaque.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            percent: parse_percent(&self.percent),
            percent_text: self.percent.clone(),
            speed: normalize_rate(&self.speed),
            eta: self.eta.clone(),
        }
    }
}

/// Control actions the service accepts for an in-flight download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlAction {
    Pause,
    Resume,
    Stop,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::Stop => "stop",
        }
    }
}

/// Contract of the video-download web service.
#[async_trait]
pub trait DownloadService: Send + Sync {
    /// Fetch the descriptor (metadata plus format lists) for a URL.
    async fn get_info(&self, url: &str) -> Result<VideoDescriptor, ClientError>;

    /// Ask the service to start a download; returns the session token.
    async fn start_download(
        &self,
        url: &str,
        format_id: &str,
        title: &str,
    ) -> Result<String, ClientError>;

    /// Query the current progress of a session.
    async fn progress(&self, client_id: &str) -> Result<ProgressUpdate, ClientError>;

    /// Retrieve the finished artifact of a completed session.
    async fn fetch_file(&self, client_id: &str) -> Result<Bytes, ClientError>;

    /// Send a pause/resume/stop request for an in-flight session.
    async fn control(&self, client_id: &str, action: ControlAction) -> Result<(), ClientError>;
}

/// Configuration for the HTTP service client.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of the service, e.g. "http://127.0.0.1:5000"
    pub base_url: String,
    /// SOCKS5/HTTP proxy URL
    pub proxy: Option<String>,
    /// Request timeout in seconds
    pub timeout_seconds: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            proxy: None,
            timeout_seconds: 30,
        }
    }
}

impl ServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// `DownloadService` over HTTP via reqwest.
pub struct HttpService {
    config: ServiceConfig,
    http: reqwest::Client,
}

impl HttpService {
    pub fn new(config: ServiceConfig) -> Result<Self, ClientError> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_seconds as u64));

        if let Some(proxy_url) = config.proxy.as_deref() {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                ClientError::Transport(format!("invalid proxy URL {}: {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// The service reports domain errors as an "error" field in the JSON
    /// body (regardless of HTTP status); pull it out before decoding.
    fn check_error_field(body: &Value) -> Result<(), ClientError> {
        if let Some(message) = body.get("error").and_then(Value::as_str) {
            return Err(ClientError::Upstream(message.to_string()));
        }
        Ok(())
    }

    async fn post_json(&self, path: &str, payload: Value) -> Result<Value, ClientError> {
        let url = self.endpoint(path);
        debug!(%url, "POST");
        let response = self.http.post(&url).json(&payload).send().await?;
        let body: Value = response.json().await?;
        Self::check_error_field(&body)?;
        Ok(body)
    }

    async fn get_json(&self, path: &str) -> Result<Value, ClientError> {
        let url = self.endpoint(path);
        debug!(%url, "GET");
        let response = self.http.get(&url).send().await?;
        let body: Value = response.json().await?;
        Self::check_error_field(&body)?;
        Ok(body)
    }
}

#[async_trait]
impl DownloadService for HttpService {
    async fn get_info(&self, url: &str) -> Result<VideoDescriptor, ClientError> {
        let body = self.post_json("get_info", json!({ "url": url })).await?;
        serde_json::from_value(body)
            .map_err(|e| ClientError::Transport(format!("unreadable get_info response: {}", e)))
    }

    async fn start_download(
        &self,
        url: &str,
        format_id: &str,
        title: &str,
    ) -> Result<String, ClientError> {
        let body = self
            .post_json(
                "download",
                json!({ "url": url, "format_id": format_id, "title": title }),
            )
            .await?;

        body.get("client_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ClientError::Transport(
                    "service accepted the download but returned no client_id".to_string(),
                )
            })
    }

    async fn progress(&self, client_id: &str) -> Result<ProgressUpdate, ClientError> {
        let body = self.get_json(&format!("progress/{}", client_id)).await?;
        serde_json::from_value(body)
            .map_err(|e| ClientError::Transport(format!("unreadable progress response: {}", e)))
    }

    async fn fetch_file(&self, client_id: &str) -> Result<Bytes, ClientError> {
        let url = self.endpoint(&format!("get_file/{}", client_id));
        debug!(%url, "GET file");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Delivery(format!(
                "file transfer failed with HTTP {}",
                status
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| ClientError::Delivery(format!("file transfer interrupted: {}", e)))
    }

    async fn control(&self, client_id: &str, action: ControlAction) -> Result<(), ClientError> {
        self.post_json(
            &format!("control/{}", client_id),
            json!({ "action": action.as_str() }),
        )
        .await?;
        Ok(())
    }
}
