//! Primary recognition backend: HTTP speech-to-text service.
//!
//! Posts the WAV body to a configured endpoint and reads back either
//! `{"text": "..."}` or a plain-text body. Transport failures, quota
//! responses and server errors all map to `Unreachable` so the pipeline's
//! fallback policy fires; an empty recognition result maps to
//! `Unrecognized` and is absorbed as silence.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::{RecognitionBackend, RecognitionError};
use crate::error::{ConfabError, Result};

#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Recognition endpoint accepting a POSTed `audio/wav` body.
    pub endpoint: String,
    /// Bearer token, if the service requires one.
    pub api_key: Option<String>,
    /// Language hint forwarded as a query parameter.
    pub language: Option<String>,
    /// Per-request timeout. Keep this below the pipeline's per-chunk
    /// budget so a slow service fails over instead of timing the chunk out.
    pub timeout: Duration,
}

impl HttpBackendConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            language: None,
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct HttpBackend {
    client: Client,
    config: HttpBackendConfig,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfabError::Backend(e.to_string()))?;
        Ok(Self { client, config })
    }
}

impl RecognitionBackend for HttpBackend {
    fn recognize(&self, wav: &[u8], sample_rate: u32) -> std::result::Result<String, RecognitionError> {
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "audio/wav")
            .query(&[("sample_rate", sample_rate.to_string())]);
        if let Some(lang) = &self.config.language {
            request = request.query(&[("language", lang.as_str())]);
        }
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .body(wav.to_vec())
            .send()
            .map_err(|e| RecognitionError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RecognitionError::Unreachable(format!(
                "service returned {status}"
            )));
        }

        let body = response
            .text()
            .map_err(|e| RecognitionError::Unreachable(e.to_string()))?;
        debug!(bytes = body.len(), "recognition response received");

        parse_response_text(&body).ok_or(RecognitionError::Unrecognized)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Extract recognized text from a response body: JSON `{"text": ...}` when
/// it parses, the raw body otherwise. `None` for empty results.
fn parse_response_text(body: &str) -> Option<String> {
    let text = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => value.get("text")?.as_str()?.to_string(),
        Err(_) => body.to_string(),
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
