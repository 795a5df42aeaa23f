//! Stage 1 → Stage 2 → Stage 3 orchestration.
//!
//! Stages run strictly in sequence, each separated by a fixed throttle
//! pause. Only Stage 2's page fetches run concurrently.
//!
//! Usage:
//! ```bash
//! isq run --request request.json --out session.json
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::info;

use crate::config::{PipelineConfig, StageEndpoint};
use crate::error::StageError;
use crate::fetch::{fetch_all, PageFetcher};
use crate::gateway::gemini::GeminiAdapter;
use crate::gateway::{ModelGateway, ProviderError, ProviderGateway, UsageSink};
use crate::patterns::{page_evidence, PageEvidence, DEFAULT_PATTERNS};
use crate::stage3::{select_buyers, BuyerStrategy};
use crate::types::{Category, Isq, Stage1Input, Stage1Output, Stage2Output};
use crate::{stage1, stage2};

/// Per-call timeout for generation requests.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(180);

// =============================================================================
// Types
// =============================================================================

/// Full pipeline request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PipelineRequest {
    pub pmcat: Category,
    pub mcats: Vec<Category>,
    /// Seller pages used as Stage 2 evidence.
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub buyer_strategy: BuyerStrategy,
}

impl PipelineRequest {
    pub fn stage1_input(&self) -> Stage1Input {
        Stage1Input {
            pmcat: self.pmcat.clone(),
            mcats: self.mcats.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), StageError> {
        if self.pmcat.name.trim().is_empty() {
            return Err(StageError::InvalidRequest("pmcat.name must not be empty".into()));
        }
        if self.mcats.is_empty() {
            return Err(StageError::InvalidRequest("mcats must not be empty".into()));
        }
        if let Some(m) = self.mcats.iter().find(|m| m.name.trim().is_empty()) {
            return Err(StageError::InvalidRequest(format!(
                "mcat with id {:?} has an empty name",
                m.id
            )));
        }
        Ok(())
    }
}

/// Everything one run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub request: PipelineRequest,
    pub stage1: Stage1Output,
    pub stage2: Stage2Output,
    /// Which Stage 2 step produced `stage2` (`model:first`, `patterns`, ...).
    #[serde(default)]
    pub stage2_source: String,
    #[serde(default)]
    pub evidence: Vec<PageEvidence>,
    pub buyers: Vec<Isq>,
}

/// One gateway per stage. Stages may share a gateway.
#[derive(Clone)]
pub struct StageGateways {
    pub stage1: Arc<dyn ModelGateway>,
    pub stage2: Arc<dyn ModelGateway>,
    pub stage3: Option<Arc<dyn ModelGateway>>,
}

impl StageGateways {
    /// Build a retrying Gemini gateway for every configured stage endpoint.
    pub fn from_config<U: UsageSink + 'static>(
        config: &PipelineConfig,
        usage_sink: Arc<U>,
    ) -> Result<Self, ProviderError> {
        let build = |endpoint: &StageEndpoint| -> Result<Arc<dyn ModelGateway>, ProviderError> {
            let adapter =
                GeminiAdapter::with_config(&endpoint.api_key, &endpoint.base_url, GENERATE_TIMEOUT)?;
            Ok(Arc::new(ProviderGateway::new(
                adapter,
                usage_sink.clone(),
                config.gateway.clone(),
            )))
        };

        Ok(Self {
            stage1: build(&config.stage1)?,
            stage2: build(&config.stage2)?,
            stage3: config.stage3.as_ref().map(build).transpose()?,
        })
    }

    /// The same gateway for all three stages.
    pub fn shared(gateway: Arc<dyn ModelGateway>) -> Self {
        Self {
            stage1: gateway.clone(),
            stage2: gateway.clone(),
            stage3: Some(gateway),
        }
    }
}

fn session_id(now: DateTime<Utc>) -> String {
    format!("isq-{}", now.format("%Y%m%d-%H%M%S-%3f"))
}

// =============================================================================
// Full pipeline
// =============================================================================

/// Run Stage 1, Stage 2 and Stage 3 for one request.
pub async fn run_pipeline(
    gateways: &StageGateways,
    fetcher: &dyn PageFetcher,
    config: &PipelineConfig,
    request: PipelineRequest,
) -> Result<PipelineSession, StageError> {
    request.validate()?;
    if request.buyer_strategy == BuyerStrategy::ModelAssisted {
        config
            .require_stage3()
            .map_err(|e| StageError::from_provider(crate::stage3::STAGE, e))?;
    }

    let created_at = Utc::now();
    let id = session_id(created_at);
    let input = request.stage1_input();
    info!(session = %id, pmcat = %input.pmcat.name, mcats = input.mcats.len(), urls = request.urls.len(), "pipeline started");

    // --- Stage 1 ---
    sleep(config.throttle.before_stage1).await;
    info!("stage1: generating seller specifications");
    let stage1_out = stage1::generate(gateways.stage1.as_ref(), config, &input).await?;

    // --- Stage 2 ---
    sleep(config.throttle.before_stage2).await;
    info!(urls = request.urls.len(), "stage2: extracting specifications from seller pages");
    let pages = fetch_all(fetcher, &request.urls).await;
    let evidence = page_evidence(&DEFAULT_PATTERNS, &pages);
    let (stage2_out, source) =
        stage2::extract_from_pages(gateways.stage2.as_ref(), config, &input, &pages).await?;
    info!(source = %source, config = %stage2_out.config.name, "stage2 complete");

    // --- Stage 3 ---
    sleep(config.throttle.before_stage3).await;
    info!(strategy = ?request.buyer_strategy, "stage3: selecting buyer specifications");
    let buyers = select_buyers(
        request.buyer_strategy,
        gateways.stage3.as_deref(),
        config,
        &stage1_out,
        &stage2_out,
    )
    .await?;
    info!(
        buyers = ?buyers.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(),
        "pipeline done"
    );

    Ok(PipelineSession {
        id,
        created_at,
        request,
        stage1: stage1_out,
        stage2: stage2_out,
        stage2_source: source.to_string(),
        evidence,
        buyers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{config, quota_error, ScriptedGateway, StaticPages};
    use serde_json::json;

    fn request() -> PipelineRequest {
        PipelineRequest {
            pmcat: Category::new("Stainless Steel Sheets", "P1"),
            mcats: vec![Category::new("SS 304 Sheet", "M1")],
            urls: vec!["https://a".into(), "https://b".into()],
            buyer_strategy: BuyerStrategy::Reconcile,
        }
    }

    fn stage1_body() -> String {
        json!({"seller_specs": [{"pmcat_name": "Stainless Steel Sheets", "pmcat_id": "P1", "mcats": [{
            "mcat_name": "SS 304 Sheet", "mcat_id": "M1",
            "primary_specs": [
                {"spec_name": "Grade", "options": ["304", "316"]},
                {"spec_name": "Thickness", "options": ["1 mm", "2 mm"]}
            ],
            "secondary_specs": [{"spec_name": "Finish", "options": ["2B", "BA"]}],
            "tertiary_specs": []
        }]}]})
        .to_string()
    }

    fn stage2_body() -> String {
        json!({
            "config": {"name": "Grade", "options": ["304", "316", "304L"]},
            "keys": [
                {"name": "Thk", "options": ["2 mm", "3 mm"]},
                {"name": "Width", "options": ["1250 mm", "1500 mm"]},
                {"name": "Finish", "options": ["2B", "Mirror"]}
            ]
        })
        .to_string()
    }

    #[tokio::test]
    async fn runs_all_three_stages_in_order() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Ok(stage1_body()), Ok(stage2_body())]));
        let gateways = StageGateways::shared(gateway.clone());
        let pages = StaticPages::new(&[("https://a", "Grade: 304, 316\nThickness: 2 mm")]);

        let session = run_pipeline(&gateways, &pages, &config(), request()).await.unwrap();

        assert_eq!(gateway.calls(), 2);
        assert!(session.id.starts_with("isq-"));
        assert_eq!(session.stage2_source, "model:first");
        assert_eq!(session.evidence.len(), 2);
        assert_eq!(session.evidence[0].specs.len(), 2);
        assert_eq!(session.evidence[1].chars, 0);

        let names: Vec<&str> = session.buyers.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Grade", "Thickness"]);
        assert_eq!(session.buyers[0].options, vec!["304", "316", "304L"]);
        assert_eq!(session.buyers[1].options, vec!["2 mm", "3 mm", "1 mm"]);
    }

    #[tokio::test]
    async fn stage1_quota_stops_the_run() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Err(quota_error())]));
        let err = run_pipeline(
            &StageGateways::shared(gateway.clone()),
            &StaticPages::empty(),
            &config(),
            request(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StageError::QuotaExhausted { stage: "stage1", .. }));
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn total_model_failure_still_produces_a_session() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let session = run_pipeline(
            &StageGateways::shared(gateway.clone()),
            &StaticPages::empty(),
            &config(),
            request(),
        )
        .await
        .unwrap();
        // One stage1 call, three stage2 attempts.
        assert_eq!(gateway.calls(), 4);
        assert!(session.stage1.is_empty());
        assert_eq!(session.stage2, stage2::default_isqs());
        assert_eq!(session.stage2_source, "default");
        assert_eq!(session.buyers.len(), 2);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_any_call() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let mut req = request();
        req.mcats.clear();
        let err = run_pipeline(
            &StageGateways::shared(gateway.clone()),
            &StaticPages::empty(),
            &config(),
            req,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StageError::InvalidRequest(_)));
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn model_assisted_without_stage3_key_is_config_error() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let mut cfg = config();
        cfg.stage3 = None;
        let mut req = request();
        req.buyer_strategy = BuyerStrategy::ModelAssisted;
        let err = run_pipeline(&StageGateways::shared(gateway.clone()), &StaticPages::empty(), &cfg, req)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Config(_)));
        assert_eq!(gateway.calls(), 0);
    }

    #[test]
    fn request_json_defaults() {
        let req: PipelineRequest = serde_json::from_value(json!({
            "pmcat": {"name": "Stainless Steel Sheets", "id": "P1"},
            "mcats": [{"name": "SS 304 Sheet", "id": 42}]
        }))
        .unwrap();
        assert!(req.urls.is_empty());
        assert_eq!(req.buyer_strategy, BuyerStrategy::Reconcile);
        assert_eq!(req.mcats[0].id, "42");
    }

    #[test]
    fn from_config_builds_optional_stage3() {
        let mut cfg = config();
        let gateways = StageGateways::from_config(&cfg, Arc::new(crate::gateway::NoopUsageSink)).unwrap();
        assert!(gateways.stage3.is_some());
        cfg.stage3 = None;
        let gateways = StageGateways::from_config(&cfg, Arc::new(crate::gateway::NoopUsageSink)).unwrap();
        assert!(gateways.stage3.is_none());
    }
}
