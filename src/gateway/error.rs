//! Error types for the generation gateway.

use std::time::Duration;
use thiserror::Error;

/// Additional context from provider errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the provider.
    pub http_status: Option<u16>,
    /// Provider-specific error status (e.g. "RESOURCE_EXHAUSTED").
    pub provider_code: Option<String>,
    /// Request ID from provider (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors that can occur when calling the generation API.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Configuration error (missing API key, etc.).
    #[error("configuration error: {0}")]
    Config(String),

    /// API credential has no quota left. Retrying will not help.
    #[error("quota exhausted: {message}")]
    QuotaExhausted {
        message: String,
        context: Option<ErrorContext>,
    },

    /// Provider overloaded (429/502/503). Retryable until the attempt ceiling.
    #[error("provider overloaded (HTTP {status}): {message}")]
    Overloaded {
        status: u16,
        message: String,
        context: Option<ErrorContext>,
    },

    /// Any other non-2xx response. Permanent, never retried.
    #[error("upstream error (HTTP {status}): {message}")]
    Upstream {
        status: u16,
        message: String,
        context: Option<ErrorContext>,
    },

    /// Invalid request - permanent error, don't retry.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request timed out.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// HTTP/network error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProviderError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a quota exhausted error.
    pub fn quota_exhausted(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::QuotaExhausted {
            message: message.into(),
            context: Some(context),
        }
    }

    /// Create an overloaded error.
    pub fn overloaded(status: u16, message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Overloaded {
            status,
            message: message.into(),
            context: Some(context),
        }
    }

    /// Create an upstream error.
    pub fn upstream(status: u16, message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
            context: Some(context),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Whether the gateway should retry this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Overloaded { .. } | Self::Timeout(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Config(_)
            | Self::QuotaExhausted { .. }
            | Self::Upstream { .. }
            | Self::InvalidRequest(_) => false,
        }
    }

    /// Whether this error means the credential is rate- or quota-limited.
    ///
    /// An exhausted 429 counts: once the retry ceiling is hit, further calls
    /// in the same run are futile.
    pub fn is_quota(&self) -> bool {
        match self {
            Self::QuotaExhausted { .. } => true,
            Self::Overloaded { status: 429, .. } => true,
            other => other.to_string().to_lowercase().contains("quota"),
        }
    }

    /// Get a short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::Overloaded { .. } => "overloaded",
            Self::Upstream { .. } => "upstream_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Timeout(_) => "timeout",
            Self::Http(_) => "http_error",
        }
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::QuotaExhausted { context, .. } => context.as_ref(),
            Self::Overloaded { context, .. } => context.as_ref(),
            Self::Upstream { context, .. } => context.as_ref(),
            Self::Config(_) | Self::InvalidRequest(_) | Self::Timeout(_) | Self::Http(_) => None,
        }
    }

    /// HTTP status of the failed call, if one was received.
    pub fn http_status(&self) -> Option<u16> {
        self.context().and_then(|c| c.http_status)
    }

    /// Get the request ID if available.
    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }
}
