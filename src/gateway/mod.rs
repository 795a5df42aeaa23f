//! Generation gateway: one adapter per stage endpoint, wrapped in retry.

pub mod error;
pub mod gemini;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::warn;

use gemini::{GeminiAdapter, GenerateProvider};
use usage::{CallRecord, UsageSink as UsageSinkTrait};

pub use error::{ErrorContext, ProviderError};
pub use types::*;
pub use usage::{NoopUsageSink, StderrUsageSink, UsageSink};

/// A retried generation call. Stages only ever talk to this trait.
#[async_trait::async_trait]
pub trait ModelGateway: Send + Sync {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

pub struct ProviderGateway<U: UsageSinkTrait> {
    provider: Box<dyn GenerateProvider>,
    usage_sink: Arc<U>,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> ModelGateway for ProviderGateway<U> {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        ProviderGateway::generate(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    pub fn new(adapter: GeminiAdapter, usage_sink: Arc<U>, config: GatewayConfig) -> Self {
        Self::with_provider(Box::new(adapter), usage_sink, config)
    }

    pub fn with_provider(
        provider: Box<dyn GenerateProvider>,
        usage_sink: Arc<U>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            provider,
            usage_sink,
            config,
        }
    }

    pub async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let mut attempt = 0;

        loop {
            let start = Instant::now();
            let result = self.provider.generate(&req).await;
            let latency_ms = start.elapsed().as_millis() as u64;

            let err = match result {
                Ok(resp) => {
                    self.record_usage(&req, attempt, latency_ms, None).await;
                    return Ok(resp);
                }
                Err(err) => err,
            };
            self.record_usage(&req, attempt, latency_ms, Some(&err)).await;

            if !err.is_retryable() || attempt >= self.config.max_retries {
                return Err(err);
            }

            let delay = backoff_delay(self.config.retry_base_delay, attempt);
            warn!(
                caller = req.attribution.caller,
                model = %req.model,
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "generation call overloaded; retrying"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    async fn record_usage(
        &self,
        req: &GenerateRequest,
        attempt: u32,
        latency_ms: u64,
        err: Option<&ProviderError>,
    ) {
        let record = CallRecord::new(
            self.provider.name(),
            "generateContent",
            &req.model,
            req.attribution.caller,
        )
        .template(req.attribution.template)
        .attempt(attempt)
        .latency(latency_ms);

        let record = match err {
            Some(e) => record.error(e.code(), e.http_status()),
            None => record,
        };

        self.usage_sink.record(record).await;
    }
}

/// `base × 2^attempt`, no jitter. The exponent is capped so a misconfigured
/// retry ceiling cannot overflow.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u32.pow(attempt.min(16));
    base.saturating_mul(multiplier)
}
