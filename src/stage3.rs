//! Stage 3: pick at most two buyer-facing ISQs from the specs both earlier
//! stages agree on.
//!
//! [`reconcile`] is pure. [`reconcile_with_model`] asks a third model call
//! to make the same choice and falls back to the pure algorithm whenever the
//! answer cannot be trusted.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::gateway::{Attribution, GenerateRequest, ModelGateway};
use crate::json_extract::extract_as;
use crate::normalize::NameNormalizer;
use crate::prompts::{render_stage3, STAGE3};
use crate::stage2::default_isqs;
use crate::types::{dedupe_options, option_key, Isq, Stage1Output, Stage2Output, Tier};

pub const STAGE: &str = "stage3";

/// Buyer ISQs returned at most.
pub const MAX_BUYERS: usize = 2;
/// Options kept per buyer ISQ.
pub const MAX_BUYER_OPTIONS: usize = 8;

const TEMPERATURE: f32 = 0.2;
const MAX_OUTPUT_TOKENS: u32 = 1_024;

// =============================================================================
// Types
// =============================================================================

/// A spec named by both stages, with each stage's options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommonSpec {
    /// Stage 1 display name.
    pub name: String,
    /// Best tier the spec was listed under in Stage 1.
    pub tier: Tier,
    pub stage1_options: Vec<String>,
    pub stage2_options: Vec<String>,
}

/// How buyer ISQs are chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuyerStrategy {
    #[default]
    Reconcile,
    ModelAssisted,
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Fill up to two buyers from a fixed default pair when fewer than two
    /// common specs exist.
    pub pad_with_defaults: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            pad_with_defaults: true,
        }
    }
}

// =============================================================================
// Pure reconciliation
// =============================================================================

/// Stage 1 specs whose normalized name also appears in Stage 2, one entry
/// per normalized name, ordered by tier and then first appearance.
pub fn common_specs(
    stage1: &Stage1Output,
    stage2: &Stage2Output,
    normalizer: &NameNormalizer,
) -> Vec<CommonSpec> {
    let stage2_specs: Vec<(String, &Isq)> = stage2
        .iter_isqs()
        .map(|(_, isq)| (normalizer.normalize(&isq.name), isq))
        .filter(|(key, _)| !key.is_empty())
        .collect();

    let mut common: Vec<(String, CommonSpec)> = Vec::new();
    for (tier, spec) in stage1.iter_specs() {
        let key = normalizer.normalize(&spec.name);
        if key.is_empty() {
            continue;
        }
        let Some((_, isq)) = stage2_specs.iter().find(|(k, _)| *k == key) else {
            continue;
        };

        match common.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                if tier < existing.tier {
                    existing.tier = tier;
                    existing.name = spec.name.trim().to_string();
                    existing.stage1_options =
                        dedupe_options(spec.options.iter().chain(existing.stage1_options.iter()));
                } else {
                    existing.stage1_options =
                        dedupe_options(existing.stage1_options.iter().chain(spec.options.iter()));
                }
            }
            None => common.push((
                key,
                CommonSpec {
                    name: spec.name.trim().to_string(),
                    tier,
                    stage1_options: dedupe_options(&spec.options),
                    stage2_options: dedupe_options(&isq.options),
                },
            )),
        }
    }

    let mut common: Vec<CommonSpec> = common.into_iter().map(|(_, c)| c).collect();
    common.sort_by_key(|c| c.tier);
    common
}

/// Options in both lists (Stage 2 order), then Stage-2-only, then
/// Stage-1-only. Deduplicated and capped at [`MAX_BUYER_OPTIONS`].
pub fn merge_options(stage1: &[String], stage2: &[String]) -> Vec<String> {
    let stage1_keys: HashSet<String> = stage1.iter().map(|o| option_key(o)).collect();

    let (both, stage2_only): (Vec<&String>, Vec<&String>) = stage2
        .iter()
        .partition(|o| stage1_keys.contains(&option_key(o)));

    let mut merged = dedupe_options(both.into_iter().chain(stage2_only).chain(stage1.iter()));
    merged.truncate(MAX_BUYER_OPTIONS);
    merged
}

/// Two Primary, else Primary + Secondary, else two Secondary, else the first
/// two common specs in tier order.
fn select_pair(common: &[CommonSpec]) -> Vec<&CommonSpec> {
    let of_tier = move |tier: Tier| common.iter().filter(move |c| c.tier == tier);

    let primary: Vec<&CommonSpec> = of_tier(Tier::Primary).take(MAX_BUYERS).collect();
    let secondary: Vec<&CommonSpec> = of_tier(Tier::Secondary).take(MAX_BUYERS).collect();

    match (primary.len(), secondary.len()) {
        (2, _) => primary,
        (1, s) if s >= 1 => vec![primary[0], secondary[0]],
        (0, 2) => secondary,
        _ => common.iter().take(MAX_BUYERS).collect(),
    }
}

fn to_buyer(common: &CommonSpec) -> Isq {
    Isq::new(
        common.name.clone(),
        merge_options(&common.stage1_options, &common.stage2_options),
    )
}

/// Hardcoded pair used for padding.
pub fn default_buyers() -> Vec<Isq> {
    let defaults = default_isqs();
    let mut pair = vec![defaults.config];
    pair.extend(defaults.keys.into_iter().take(MAX_BUYERS - 1));
    pair
}

fn pad(mut buyers: Vec<Isq>, normalizer: &NameNormalizer) -> Vec<Isq> {
    for fallback in default_buyers() {
        if buyers.len() >= MAX_BUYERS {
            break;
        }
        if !buyers.iter().any(|b| normalizer.same(&b.name, &fallback.name)) {
            buyers.push(fallback);
        }
    }
    buyers
}

/// [`reconcile_with`] using the default normalizer and options.
pub fn reconcile(stage1: &Stage1Output, stage2: &Stage2Output) -> Vec<Isq> {
    reconcile_with(
        stage1,
        stage2,
        &NameNormalizer::default(),
        &ReconcileOptions::default(),
    )
}

pub fn reconcile_with(
    stage1: &Stage1Output,
    stage2: &Stage2Output,
    normalizer: &NameNormalizer,
    options: &ReconcileOptions,
) -> Vec<Isq> {
    let common = common_specs(stage1, stage2, normalizer);
    let buyers: Vec<Isq> = select_pair(&common).into_iter().map(to_buyer).collect();
    debug!(common = common.len(), selected = buyers.len(), "stage3 reconciled");

    if options.pad_with_defaults && buyers.len() < MAX_BUYERS {
        warn!(common = common.len(), "fewer than two common specs; padding buyer ISQs with defaults");
        return pad(buyers, normalizer);
    }
    buyers
}

// =============================================================================
// Model-assisted reconciliation
// =============================================================================

#[derive(Debug, Deserialize)]
struct ModelBuyers {
    #[serde(default, alias = "buyers", alias = "buyer_specs")]
    buyer_isqs: Vec<Isq>,
}

/// Check a model's buyer choice against the common specs and rebuild it with
/// display names from Stage 1 and clamped options. `None` if it breaks any
/// rule the pure algorithm guarantees.
fn validate_model_buyers(
    proposed: Vec<Isq>,
    common: &[CommonSpec],
    normalizer: &NameNormalizer,
) -> Option<Vec<Isq>> {
    if proposed.len() > MAX_BUYERS || proposed.len() < common.len().min(MAX_BUYERS) {
        return None;
    }

    let mut used: Vec<String> = Vec::new();
    let mut buyers = Vec::with_capacity(proposed.len());
    for isq in proposed {
        let key = normalizer.normalize(&isq.name);
        if key.is_empty() || used.contains(&key) {
            return None;
        }
        let matched = common.iter().find(|c| normalizer.normalize(&c.name) == key)?;
        used.push(key);

        let mut options = dedupe_options(&isq.options);
        options.truncate(MAX_BUYER_OPTIONS);
        if options.is_empty() {
            options = merge_options(&matched.stage1_options, &matched.stage2_options);
        }
        buyers.push(Isq::new(matched.name.clone(), options));
    }
    Some(buyers)
}

/// Ask the Stage 3 model to choose buyer ISQs. Any failure other than quota
/// or configuration falls back to [`reconcile_with`].
pub async fn reconcile_with_model(
    gateway: &dyn ModelGateway,
    config: &PipelineConfig,
    stage1: &Stage1Output,
    stage2: &Stage2Output,
) -> Result<Vec<Isq>, StageError> {
    let endpoint = config
        .require_stage3()
        .map_err(|e| StageError::from_provider(STAGE, e))?;
    let fallback = || reconcile_with(stage1, stage2, &config.normalizer, &config.reconcile);

    let common = common_specs(stage1, stage2, &config.normalizer);
    if common.is_empty() {
        debug!("no common specs; skipping stage3 model call");
        return Ok(fallback());
    }

    let req = GenerateRequest::new(
        &endpoint.model,
        render_stage3(&common),
        Attribution::new("stage3::reconcile").with_template(STAGE3.slug),
    )
    .temperature(TEMPERATURE)
    .max_output_tokens(MAX_OUTPUT_TOKENS)
    .json();

    let resp = match gateway.generate(req).await {
        Ok(resp) => resp,
        Err(err) if StageError::is_fatal(&err) => return Err(StageError::from_provider(STAGE, err)),
        Err(err) => {
            warn!(error = %err, "stage3 call failed; using pure reconciliation");
            return Ok(fallback());
        }
    };

    let validated = extract_as::<ModelBuyers>(&resp)
        .and_then(|m| validate_model_buyers(m.buyer_isqs, &common, &config.normalizer));

    match validated {
        Some(buyers) => {
            info!(buyers = buyers.len(), "stage3 accepted model selection");
            if config.reconcile.pad_with_defaults && buyers.len() < MAX_BUYERS {
                return Ok(pad(buyers, &config.normalizer));
            }
            Ok(buyers)
        }
        None => {
            warn!("stage3 model selection rejected; using pure reconciliation");
            Ok(fallback())
        }
    }
}

/// Dispatch on `strategy`. `gateway` is only used for
/// [`BuyerStrategy::ModelAssisted`].
pub async fn select_buyers(
    strategy: BuyerStrategy,
    gateway: Option<&dyn ModelGateway>,
    config: &PipelineConfig,
    stage1: &Stage1Output,
    stage2: &Stage2Output,
) -> Result<Vec<Isq>, StageError> {
    match (strategy, gateway) {
        (BuyerStrategy::Reconcile, _) => Ok(reconcile_with(
            stage1,
            stage2,
            &config.normalizer,
            &config.reconcile,
        )),
        (BuyerStrategy::ModelAssisted, Some(gateway)) => {
            reconcile_with_model(gateway, config, stage1, stage2).await
        }
        (BuyerStrategy::ModelAssisted, None) => Err(StageError::Config(
            "model-assisted reconciliation needs a stage3 gateway".into(),
        )),
    }
}
