//! HTTP client for the external API
//!
//! One record is POSTed per request. Every request carries the file record id
//! as `X-Request-ID` and the source filename as `X-Source-File`, plus the
//! configured extra headers.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::store::FileRecord;

/// Response bodies longer than this are truncated before they are stored
pub const MAX_RESPONSE_BODY_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// What happened to one POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiOutcome {
    /// `None` when no response arrived (timeout, connection refused)
    pub status: Option<u16>,
    pub body: Option<String>,
    pub error: Option<String>,
}

impl ApiOutcome {
    pub fn is_success(&self) -> bool {
        self.status.map(|s| (200..300).contains(&s)).unwrap_or(false)
    }

    /// Short description for error messages and logs
    pub fn describe(&self) -> String {
        match (self.status, &self.error) {
            (_, Some(error)) => error.clone(),
            (Some(status), None) => format!("HTTP {}", status),
            (None, None) => "no response".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    endpoint: String,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("AEI-Relay/", env!("CARGO_PKG_VERSION"))),
        );
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ApiClientError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                }
            })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| ApiClientError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            headers.insert(header_name, header_value);
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST one record. Transport failures are reported in the outcome, not as errors.
    pub async fn send(&self, file: &FileRecord, payload: &serde_json::Value) -> ApiOutcome {
        let result = self
            .client
            .post(&self.endpoint)
            .header("X-Request-ID", file.id.to_string())
            .header("X-Source-File", file.filename.as_str())
            .json(payload)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                let kind = if e.is_timeout() { "timeout" } else { "request failed" };
                warn!(file_record_id = %file.id, error = %e, "API {}", kind);
                return ApiOutcome {
                    status: None,
                    body: None,
                    error: Some(format!("{}: {}", kind, e)),
                };
            },
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(text) => Some(truncate(text)),
            Err(e) => {
                debug!(file_record_id = %file.id, error = %e, "Failed to read API response body");
                None
            },
        };

        debug!(file_record_id = %file.id, status = status.as_u16(), "API call completed");

        ApiOutcome {
            status: Some(status.as_u16()),
            error: (!status.is_success()).then(|| format!("HTTP {}", status.as_u16())),
            body,
        }
    }
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_RESPONSE_BODY_BYTES {
        let mut end = MAX_RESPONSE_BODY_BYTES;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
