//! Usage tracking via the UsageSink trait.
//!
//! The gateway logs every attempt through a UsageSink, so retries and
//! failures are visible without coupling the gateway to an output format:
//! - the CLI uses StderrUsageSink when `--usage` is passed
//! - library callers and tests use NoopUsageSink

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Status of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Success,
    Error,
}

/// Record of a single generation API attempt.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    /// Provider name, e.g. "gemini".
    pub provider: &'static str,
    /// Endpoint, e.g. "generateContent".
    pub endpoint: &'static str,
    /// Model used.
    pub model: String,
    /// Which code path made this call.
    pub caller: &'static str,
    /// Prompt template slug, when the caller set one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<&'static str>,
    /// Zero-based attempt number within the retry loop.
    pub attempt: u32,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Call status.
    pub status: CallStatus,
    /// Error code if status is Error.
    pub error_code: Option<&'static str>,
    /// HTTP status of a failed call, when one was received.
    pub http_status: Option<u16>,
    /// When the call was made.
    pub timestamp: DateTime<Utc>,
}

impl CallRecord {
    /// Create a new record with required fields, defaulting others.
    pub fn new(
        provider: &'static str,
        endpoint: &'static str,
        model: impl Into<String>,
        caller: &'static str,
    ) -> Self {
        Self {
            provider,
            endpoint,
            model: model.into(),
            caller,
            template: None,
            attempt: 0,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            http_status: None,
            timestamp: Utc::now(),
        }
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn template(mut self, slug: Option<&'static str>) -> Self {
        self.template = slug;
        self
    }

    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: &'static str, http_status: Option<u16>) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code);
        self.http_status = http_status;
        self
    }
}

/// Trait for recording provider call usage.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Record a provider call. This should be fire-and-forget:
    /// failures should be logged but not propagated.
    async fn record(&self, record: CallRecord);
}

/// No-op usage sink that discards all records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: CallRecord) {}
}

/// Usage sink that writes one JSON line per call to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrUsageSink;

#[async_trait]
impl UsageSink for StderrUsageSink {
    async fn record(&self, record: CallRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => eprintln!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize usage record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_builder_marks_status() {
        let record = CallRecord::new("gemini", "generateContent", "m", "test")
            .attempt(2)
            .error("overloaded", Some(503));
        assert_eq!(record.status, CallStatus::Error);
        assert_eq!(record.error_code, Some("overloaded"));
        assert_eq!(record.http_status, Some(503));
        assert_eq!(record.attempt, 2);
    }

    #[test]
    fn record_serializes_as_flat_json() {
        let record = CallRecord::new("gemini", "generateContent", "m", "stage1::generate");
        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["status"], "success");
        assert_eq!(v["caller"], "stage1::generate");
        assert!(v.get("template").is_none());

        let v = serde_json::to_value(record.template(Some("stage1_v1"))).unwrap();
        assert_eq!(v["template"], "stage1_v1");
    }
}
