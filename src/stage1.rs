//! Stage 1: invent a tiered seller-specification schema per MCAT.

use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::gateway::{Attribution, GenerateRequest, ModelGateway};
use crate::json_extract::extract_as;
use crate::prompts::{render_stage1, STAGE1};
use crate::types::{Stage1Input, Stage1Output};

pub const STAGE: &str = "stage1";

const TEMPERATURE: f32 = 0.4;
const MAX_OUTPUT_TOKENS: u32 = 8_192;

/// One retried call. Quota and configuration errors are returned; every
/// other failure yields an empty `Stage1Output` so the pipeline can go on.
pub async fn generate(
    gateway: &dyn ModelGateway,
    config: &PipelineConfig,
    input: &Stage1Input,
) -> Result<Stage1Output, StageError> {
    let prompt = render_stage1(input);
    debug!(pmcat = %input.pmcat.name, mcats = input.mcats.len(), prompt_chars = prompt.len(), "stage1 prompt");

    let req = GenerateRequest::new(
        &config.stage1.model,
        prompt,
        Attribution::new("stage1::generate").with_template(STAGE1.slug),
    )
    .temperature(TEMPERATURE)
    .max_output_tokens(MAX_OUTPUT_TOKENS)
    .json();

    let resp = match gateway.generate(req).await {
        Ok(resp) => resp,
        Err(err) if StageError::is_fatal(&err) => return Err(StageError::from_provider(STAGE, err)),
        Err(err) => {
            warn!(error = %err, "stage1 call failed; continuing with empty output");
            return Ok(Stage1Output::default());
        }
    };

    let Some(raw) = extract_as::<Stage1Output>(&resp) else {
        warn!("stage1 response was not usable JSON; continuing with empty output");
        return Ok(Stage1Output::default());
    };

    let output = raw.conform(input);
    info!(
        mcats = output.seller_specs.iter().map(|p| p.mcats.len()).sum::<usize>(),
        specs = output.iter_specs().count(),
        "stage1 complete"
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{config, quota_error, upstream_error, ScriptedGateway};
    use crate::types::{Category, Tier};

    fn input() -> Stage1Input {
        Stage1Input {
            pmcat: Category::new("Stainless Steel Sheets", "P1"),
            mcats: vec![
                Category::new("SS 304 Sheet", "M1"),
                Category::new("SS 316 Sheet", "M2"),
            ],
        }
    }

    #[tokio::test]
    async fn decodes_and_conforms_fenced_output() {
        let body = r#"Here you go:
```json
{"seller_specs":[{"pmcat_name":"Stainless Steel Sheets","pmcat_id":"P1","mcats":[
  {"mcat_name":"SS 304 Sheet","mcat_id":"M1",
   "primary_specs":[{"spec_name":"Grade","options":["304","304L"],"affix_flag":"Prefix","affix_presence_flag":"1"},
                    {"spec_name":"Thickness","options":["1 mm","2 mm"]}],
   "secondary_specs":[{"spec_name":"Finish","options":["2B","BA"],"affix_flag":"Suffix"}],
   "tertiary_specs":[],}
]}]}
```"#;
        let gateway = ScriptedGateway::new(vec![Ok(body.to_string())]);
        let out = generate(&gateway, &config(), &input()).await.unwrap();

        let mcats = &out.seller_specs[0].mcats;
        assert_eq!(mcats.len(), 2);
        assert_eq!(mcats[0].primary_specs.len(), 2);
        assert_eq!(mcats[0].secondary_specs[0].tier, Some(Tier::Secondary));
        assert_eq!(
            mcats[0].secondary_specs[0].affix_flag,
            Some(crate::types::AffixFlag::None)
        );
        assert!(mcats[1].primary_specs.is_empty());
        assert!(gateway.prompts()[0].contains("SS 316 Sheet"));
    }

    #[tokio::test]
    async fn garbage_response_gives_empty_output() {
        let gateway = ScriptedGateway::new(vec![Ok("sorry, I can't help".to_string())]);
        let out = generate(&gateway, &config(), &input()).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn non_quota_error_gives_empty_output() {
        let gateway = ScriptedGateway::new(vec![Err(upstream_error(500))]);
        let out = generate(&gateway, &config(), &input()).await.unwrap();
        assert_eq!(out, Stage1Output::default());
    }

    #[tokio::test]
    async fn quota_error_is_surfaced() {
        let gateway = ScriptedGateway::new(vec![Err(quota_error())]);
        let err = generate(&gateway, &config(), &input()).await.unwrap_err();
        assert!(matches!(err, StageError::QuotaExhausted { stage: "stage1", .. }));
    }
}
