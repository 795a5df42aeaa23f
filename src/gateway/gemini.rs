//! Adapter for Gemini-style `generateContent` endpoints.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::*;

// =============================================================================
// TRAIT
// =============================================================================

/// A single, unretried call to the generation API.
#[async_trait]
pub trait GenerateProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError>;
}

// =============================================================================
// GEMINI ADAPTER
// =============================================================================

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Maximum allowed response body length (4MB).
const MAX_RESPONSE_LEN: usize = 4 * 1_024 * 1_024;

/// Maximum allowed prompt characters.
const MAX_PROMPT_CHARS: usize = 600_000;

/// Adapter for one stage's endpoint and API key.
#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl GeminiAdapter {
    /// Create from API key with the public endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, Duration::from_secs(180))
    }

    /// Create with custom configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::config("API key is empty"));
        }
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            timeout,
        })
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    /// Extract request ID from response headers.
    fn extract_request_id(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    /// Transport errors, with client-side timeouts reported as `Timeout`.
    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Http(err)
        }
    }

    /// Map a non-2xx status and body to the error taxonomy.
    fn classify(status: u16, message: String, ctx: ErrorContext) -> ProviderError {
        let mentions_quota = message.to_lowercase().contains("quota");
        match status {
            429 if mentions_quota => ProviderError::quota_exhausted(message, ctx),
            429 | 502 | 503 => ProviderError::overloaded(status, message, ctx),
            _ => ProviderError::upstream(status, message, ctx),
        }
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ApiRequest<'a> {
    contents: [ApiContent<'a>; 1],
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct ApiContent<'a> {
    parts: [ApiPart<'a>; 1],
}

#[derive(Serialize)]
struct ApiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    status: Option<String>,
}

// =============================================================================
// PROVIDER IMPL
// =============================================================================

#[async_trait]
impl GenerateProvider for GeminiAdapter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        if req.prompt.len() > MAX_PROMPT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Prompt too large: {} chars (max {MAX_PROMPT_CHARS})",
                req.prompt.len()
            )));
        }

        let start = Instant::now();

        let api_req = ApiRequest {
            contents: [ApiContent {
                parts: [ApiPart { text: &req.prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: req.temperature,
                max_output_tokens: req.max_output_tokens,
                response_mime_type: req.json_mode.then_some("application/json"),
            },
        };

        let mut response = self
            .client
            .post(self.generate_url(&req.model))
            .query(&[("key", self.api_key.as_str())])
            .json(&api_req)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());

        // Stream response to enforce size limit
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.transport_error(e))? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::upstream(
                    status.as_u16(),
                    format!("Response too large: {new_len} bytes"),
                    ErrorContext::new().with_status(status.as_u16()),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&bytes).to_string();

        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = if let Some(id) = &request_id {
            ctx.with_request_id(id)
        } else {
            ctx
        };

        if !status.is_success() {
            let (message, ctx) = match serde_json::from_str::<ApiErrorEnvelope>(&body) {
                Ok(ApiErrorEnvelope {
                    error: Some(error),
                }) => {
                    let ctx = match error.status {
                        Some(code) => ctx.with_code(code),
                        None => ctx,
                    };
                    (error.message.unwrap_or_default(), ctx)
                }
                _ => (format!("HTTP {}", status.as_u16()), ctx),
            };
            return Err(Self::classify(status.as_u16(), message, ctx));
        }

        // A 2xx with an unreadable body is handed on as an empty response;
        // the unwrapper treats it as "no candidate".
        let mut parsed: GenerateResponse = serde_json::from_str(&body).unwrap_or_default();
        parsed.latency = start.elapsed();
        Ok(parsed)
    }
}
