//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::{PipelineConfig, StageEndpoint, ThrottleConfig};
use crate::fetch::PageFetcher;
use crate::gateway::{ErrorContext, GenerateRequest, GenerateResponse, ModelGateway, ProviderError};

/// Gateway that replays canned responses in order. Once the script runs out
/// every call gets an empty response.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    seen: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedGateway {
    pub fn new(script: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn temperatures(&self) -> Vec<f32> {
        self.seen.lock().unwrap().iter().map(|r| r.temperature).collect()
    }

    pub fn templates(&self) -> Vec<Option<&'static str>> {
        self.seen.lock().unwrap().iter().map(|r| r.attribution.template).collect()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|r| r.prompt.clone()).collect()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        self.seen.lock().unwrap().push(req);
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(GenerateResponse::from_text(text)),
            Some(Err(err)) => Err(err),
            None => Ok(GenerateResponse::default()),
        }
    }
}

/// Fetcher that serves fixed text per URL and `""` for anything else.
pub struct StaticPages {
    pages: Vec<(String, String)>,
}

impl StaticPages {
    pub fn empty() -> Self {
        Self { pages: Vec::new() }
    }

    pub fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(u, t)| (u.to_string(), t.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl PageFetcher for StaticPages {
    async fn fetch_text(&self, url: &str) -> String {
        self.pages
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, t)| t.clone())
            .unwrap_or_default()
    }
}

/// Config with test keys for all three stages and no throttling.
pub fn config() -> PipelineConfig {
    let mut config = PipelineConfig::new(StageEndpoint::new("k1"), StageEndpoint::new("k2"));
    config.stage3 = Some(StageEndpoint::new("k3"));
    config.throttle = ThrottleConfig::none();
    config
}

pub fn quota_error() -> ProviderError {
    ProviderError::quota_exhausted(
        "Quota exceeded for quota metric 'Generate Content API requests per minute'",
        ErrorContext::new().with_status(429),
    )
}

pub fn upstream_error(status: u16) -> ProviderError {
    ProviderError::upstream(status, "boom", ErrorContext::new().with_status(status))
}
