//! Run configuration, built once at startup and passed by reference.

use std::time::Duration;

use crate::fetch::FetchConfig;
use crate::gateway::gemini::DEFAULT_BASE_URL;
use crate::gateway::{GatewayConfig, ProviderError};
use crate::normalize::NameNormalizer;
use crate::stage3::ReconcileOptions;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Endpoint, credential and model for one stage.
#[derive(Debug, Clone)]
pub struct StageEndpoint {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl StageEndpoint {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Fixed pauses that keep a run under the API's informal rate limit.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub before_stage1: Duration,
    pub before_stage2: Duration,
    pub before_stage3: Duration,
    pub between_attempts: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            before_stage1: Duration::from_secs(3),
            before_stage2: Duration::from_secs(5),
            before_stage3: Duration::from_secs(3),
            between_attempts: Duration::from_secs(3),
        }
    }
}

impl ThrottleConfig {
    /// Every pause set to `d`.
    pub fn uniform(d: Duration) -> Self {
        Self {
            before_stage1: d,
            before_stage2: d,
            before_stage3: d,
            between_attempts: d,
        }
    }

    pub fn none() -> Self {
        Self::uniform(Duration::ZERO)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub stage1: StageEndpoint,
    pub stage2: StageEndpoint,
    /// Only needed for model-assisted reconciliation.
    pub stage3: Option<StageEndpoint>,
    pub gateway: GatewayConfig,
    pub throttle: ThrottleConfig,
    pub fetch: FetchConfig,
    pub normalizer: NameNormalizer,
    pub reconcile: ReconcileOptions,
}

impl PipelineConfig {
    pub fn new(stage1: StageEndpoint, stage2: StageEndpoint) -> Self {
        Self {
            stage1,
            stage2,
            stage3: None,
            gateway: GatewayConfig::default(),
            throttle: ThrottleConfig::default(),
            fetch: FetchConfig::default(),
            normalizer: NameNormalizer::default(),
            reconcile: ReconcileOptions::default(),
        }
    }

    /// Read configuration from `ISQ_*` environment variables.
    ///
    /// A missing Stage 1 or Stage 2 key is a configuration error; the Stage 3
    /// key is optional.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup, so
    /// tests never touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let base_url = get("ISQ_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let endpoint = |key: String, model_var: &str| {
            StageEndpoint::new(key)
                .base_url(base_url.clone())
                .model(get(model_var).unwrap_or_else(|| DEFAULT_MODEL.to_string()))
        };

        let stage1_key = get("ISQ_STAGE1_API_KEY")
            .ok_or_else(|| ProviderError::config("ISQ_STAGE1_API_KEY not set"))?;
        let stage2_key = get("ISQ_STAGE2_API_KEY")
            .ok_or_else(|| ProviderError::config("ISQ_STAGE2_API_KEY not set"))?;

        let mut config = Self::new(
            endpoint(stage1_key, "ISQ_STAGE1_MODEL"),
            endpoint(stage2_key, "ISQ_STAGE2_MODEL"),
        );
        config.stage3 = get("ISQ_STAGE3_API_KEY").map(|key| endpoint(key, "ISQ_STAGE3_MODEL"));

        if let Some(retries) = get("ISQ_MAX_RETRIES").and_then(|s| s.parse().ok()) {
            config.gateway.max_retries = retries;
        }
        if let Some(ms) = get("ISQ_RETRY_BASE_DELAY_MS").and_then(|s| s.parse().ok()) {
            config.gateway.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = get("ISQ_THROTTLE_SECS").and_then(|s| s.parse().ok()) {
            config.throttle = ThrottleConfig::uniform(Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Stage 3 endpoint, or a configuration error when model-assisted
    /// reconciliation was requested without one.
    pub fn require_stage3(&self) -> Result<&StageEndpoint, ProviderError> {
        self.stage3
            .as_ref()
            .ok_or_else(|| ProviderError::config("ISQ_STAGE3_API_KEY not set"))
    }
}
