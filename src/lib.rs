#![forbid(unsafe_code)]

//! # isq-harness
//!
//! Builds item specification (ISQ) taxonomies for marketplace categories with
//! a three-stage LLM pipeline.
//!
//! Stage 1 asks a model for tiered seller specifications of a category.
//! Stage 2 reads seller web pages and extracts one configuration spec plus
//! up to three key specs, falling back to regex mining and then to a fixed
//! default set. Stage 3 reconciles both views into at most two buyer specs,
//! either deterministically or with a model whose answer is validated
//! against the same rules.
//!
//! Every stage degrades to a usable value on its own failures; only
//! configuration errors and quota exhaustion abort a run.

pub mod compare;
pub mod config;
pub mod error;
pub mod export;
pub mod fetch;
pub mod gateway;
pub mod json_extract;
pub mod normalize;
pub mod patterns;
pub mod pipeline;
pub mod prompts;
pub mod stage1;
pub mod stage2;
pub mod stage3;
pub mod types;

#[cfg(test)]
mod testing;

pub use compare::{compare, SpecComparison};
pub use config::{PipelineConfig, StageEndpoint, ThrottleConfig};
pub use error::{ExportError, StageError};
pub use export::ExportBundle;
pub use fetch::{HttpPageFetcher, PageFetcher, PageText};
pub use gateway::{Attribution, ModelGateway, ProviderError, ProviderGateway, UsageSink};
pub use normalize::{normalize, NameNormalizer};
pub use pipeline::{run_pipeline, PipelineRequest, PipelineSession, StageGateways};
pub use stage3::{reconcile, reconcile_with, BuyerStrategy, ReconcileOptions};
pub use types::{Category, Isq, Spec, Stage1Input, Stage1Output, Stage2Output, Tier};
