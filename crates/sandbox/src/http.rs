//! Size- and time-capped HTTP client backing the sandbox fetch proxy.
//!
//! The bridge depends only on the [`HookHttpClient`] contract, so tests (and
//! alternative transports) can swap the implementation. The default client
//! reads response bodies up front, truncating at the caller's byte cap —
//! only plain data ever reaches the isolate.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use thiserror::Error;

/// One outbound request on behalf of hook code. `method`/`headers`/`body`
/// mirror the subset of fetch options the shim accepts.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }
}

/// Response descriptor with the body pre-read to a string. `truncated` marks
/// bodies cut at the byte cap.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub ok: bool,
    pub status: u16,
    pub status_text: String,
    pub string_body: String,
    pub truncated: bool,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out after {0}ms")]
    TimedOut(u64),
}

#[async_trait]
pub trait HookHttpClient: Send + Sync {
    async fn fetch(
        &self,
        request: FetchRequest,
        max_content_size: u64,
        max_time_ms: u64,
    ) -> Result<FetchOutcome, FetchError>;
}

/// Default client on reqwest/rustls.
pub struct CappedHttpClient {
    client: reqwest::Client,
}

impl CappedHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for CappedHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HookHttpClient for CappedHttpClient {
    async fn fetch(
        &self,
        request: FetchRequest,
        max_content_size: u64,
        max_time_ms: u64,
    ) -> Result<FetchOutcome, FetchError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| FetchError::InvalidRequest(format!("invalid method: {}", request.method)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(Duration::from_millis(max_time_ms));
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let map_err = |err: reqwest::Error| {
            if err.is_timeout() {
                FetchError::TimedOut(max_time_ms)
            } else if err.is_builder() {
                FetchError::InvalidRequest(err.to_string())
            } else {
                FetchError::Transport(err.to_string())
            }
        };

        let mut response = builder.send().await.map_err(map_err)?;
        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or("").to_string();

        // Read the body in chunks and stop at the cap. The request-level
        // timeout above also covers this read.
        let cap = max_content_size as usize;
        let mut body: Vec<u8> = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await.map_err(map_err)? {
            if body.len() + chunk.len() <= cap {
                body.extend_from_slice(&chunk);
                continue;
            }
            let remaining = cap.saturating_sub(body.len());
            body.extend_from_slice(&chunk[..remaining]);
            truncated = true;
            break;
        }
        if truncated {
            tracing::debug!(
                url = %request.url,
                cap = max_content_size,
                "fetch body truncated at size cap"
            );
        }

        Ok(FetchOutcome {
            ok: status.is_success(),
            status: status.as_u16(),
            status_text,
            string_body: String::from_utf8_lossy(&body).into_owned(),
            truncated,
        })
    }
}
