//! Stage 2: extract one `config` ISQ and three `key` ISQs from seller pages.
//!
//! Resolution order, stopping at the first result that passes
//! [`is_valid_isq_set`]:
//! 1. `first` prompt
//! 2. `validation` prompt
//! 3. `fallback` prompt
//! 4. regex mining of the page text ([`crate::patterns`])
//! 5. [`default_isqs`]
//!
//! The stage therefore always returns a structurally valid set unless the
//! credential is out of quota or misconfigured.

use std::fmt;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::fetch::{fetch_all, PageFetcher, PageText};
use crate::gateway::{Attribution, GenerateRequest, ModelGateway};
use crate::json_extract::extract_as;
use crate::normalize::NameNormalizer;
use crate::patterns::{mine_pages, select_isqs, DEFAULT_PATTERNS};
use crate::prompts::{render_stage2, Stage2Attempt};
use crate::types::{Isq, Stage1Input, Stage2Output};

pub const STAGE: &str = "stage2";

/// Number of key ISQs in an accepted set.
pub const KEY_COUNT: usize = 3;

const MIN_OPTIONS: usize = 2;
const MAX_OUTPUT_TOKENS: u32 = 2_048;

/// Where an accepted Stage 2 result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage2Source {
    Model(Stage2Attempt),
    Patterns,
    Default,
}

impl fmt::Display for Stage2Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage2Source::Model(attempt) => write!(f, "model:{}", attempt.as_str()),
            Stage2Source::Patterns => f.write_str("patterns"),
            Stage2Source::Default => f.write_str("default"),
        }
    }
}

/// Domain-plausible set used when nothing else produced a valid result.
pub fn default_isqs() -> Stage2Output {
    Stage2Output {
        config: Isq::new("Material Grade", ["304", "316", "304L"]),
        keys: vec![
            Isq::new("Thickness", ["1 mm", "2 mm", "3 mm", "5 mm"]),
            Isq::new("Size", ["4 x 8 ft", "5 x 10 ft", "1250 x 2500 mm"]),
            Isq::new("Finish", ["2B", "BA", "No. 4", "Mirror"]),
        ],
    }
}

/// True when `out` has a named config with at least two options, at least
/// three keys with at least two options each, and no two names that
/// normalize to the same (or an empty) key.
pub fn is_valid_isq_set(out: &Stage2Output, normalizer: &NameNormalizer) -> bool {
    if out.config.name.trim().is_empty() || out.config.options.len() < MIN_OPTIONS {
        return false;
    }
    if out.keys.len() < KEY_COUNT || out.keys.iter().any(|k| k.options.len() < MIN_OPTIONS) {
        return false;
    }

    let mut seen: Vec<String> = Vec::with_capacity(out.keys.len() + 1);
    for (_, isq) in out.iter_isqs() {
        let key = normalizer.normalize(&isq.name);
        if key.is_empty() || seen.contains(&key) {
            return false;
        }
        seen.push(key);
    }
    true
}

/// Trim names and deduplicate options everywhere.
fn cleaned(out: Stage2Output) -> Stage2Output {
    Stage2Output {
        config: out.config.cleaned(),
        keys: out.keys.iter().map(Isq::cleaned).collect(),
    }
}

pub async fn extract(
    gateway: &dyn ModelGateway,
    fetcher: &dyn PageFetcher,
    config: &PipelineConfig,
    input: &Stage1Input,
    urls: &[String],
) -> Result<Stage2Output, StageError> {
    let (out, _) = extract_with_source(gateway, fetcher, config, input, urls).await?;
    Ok(out)
}

/// [`extract`], also reporting which step produced the result.
pub async fn extract_with_source(
    gateway: &dyn ModelGateway,
    fetcher: &dyn PageFetcher,
    config: &PipelineConfig,
    input: &Stage1Input,
    urls: &[String],
) -> Result<(Stage2Output, Stage2Source), StageError> {
    let pages = fetch_all(fetcher, urls).await;
    info!(
        urls = pages.len(),
        readable = pages.iter().filter(|p| !p.is_empty()).count(),
        "stage2 fetched seller pages"
    );
    extract_from_pages(gateway, config, input, &pages).await
}

/// Stage 2 on already fetched pages.
pub async fn extract_from_pages(
    gateway: &dyn ModelGateway,
    config: &PipelineConfig,
    input: &Stage1Input,
    pages: &[PageText],
) -> Result<(Stage2Output, Stage2Source), StageError> {
    for (idx, attempt) in Stage2Attempt::ALL.into_iter().enumerate() {
        if idx > 0 {
            sleep(config.throttle.between_attempts).await;
        }
        if let Some(out) = run_attempt(gateway, config, input, pages, attempt).await? {
            info!(attempt = attempt.as_str(), config = %out.config.name, "stage2 accepted model result");
            return Ok((out, Stage2Source::Model(attempt)));
        }
        warn!(attempt = attempt.as_str(), "stage2 attempt rejected");
    }

    if let Some(out) = from_patterns(pages, &config.normalizer) {
        warn!(config = %out.config.name, "stage2 using regex-mined specifications");
        return Ok((out, Stage2Source::Patterns));
    }

    warn!("stage2 using hardcoded default specifications");
    Ok((default_isqs(), Stage2Source::Default))
}

/// `Ok(None)` is a failed attempt; only fatal provider errors are `Err`.
async fn run_attempt(
    gateway: &dyn ModelGateway,
    config: &PipelineConfig,
    input: &Stage1Input,
    pages: &[PageText],
    attempt: Stage2Attempt,
) -> Result<Option<Stage2Output>, StageError> {
    let req = GenerateRequest::new(
        &config.stage2.model,
        render_stage2(attempt, input, pages),
        Attribution::new("stage2::extract").with_template(attempt.template().slug),
    )
    .temperature(attempt.temperature())
    .max_output_tokens(MAX_OUTPUT_TOKENS)
    .json();

    let resp = match gateway.generate(req).await {
        Ok(resp) => resp,
        Err(err) if StageError::is_fatal(&err) => return Err(StageError::from_provider(STAGE, err)),
        Err(err) => {
            warn!(attempt = attempt.as_str(), error = %err, "stage2 call failed");
            return Ok(None);
        }
    };

    let Some(raw) = extract_as::<Stage2Output>(&resp) else {
        debug!(attempt = attempt.as_str(), "stage2 response was not usable JSON");
        return Ok(None);
    };

    let mut out = cleaned(raw);
    if !is_valid_isq_set(&out, &config.normalizer) {
        debug!(attempt = attempt.as_str(), ?out, "stage2 result failed validation");
        return Ok(None);
    }
    out.keys.truncate(KEY_COUNT);
    Ok(Some(out))
}

/// Regex-mined config and keys, padded from [`default_isqs`] when fewer
/// than three keys were mined.
fn from_patterns(pages: &[PageText], normalizer: &NameNormalizer) -> Option<Stage2Output> {
    let mined = mine_pages(&DEFAULT_PATTERNS, pages);
    let (config, mut keys) = select_isqs(&mined, normalizer)?;

    let mut taken: Vec<String> = std::iter::once(&config)
        .chain(keys.iter())
        .map(|isq| normalizer.normalize(&isq.name))
        .collect();
    for fallback in default_isqs().keys {
        if keys.len() >= KEY_COUNT {
            break;
        }
        let key = normalizer.normalize(&fallback.name);
        if !taken.contains(&key) {
            taken.push(key);
            keys.push(fallback);
        }
    }

    Some(cleaned(Stage2Output { config, keys }))
}
