//! Core types for the generation gateway.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Attribution for usage tracking and debugging.
///
/// Every request through the gateway carries the code path that triggered it,
/// so retries and failures in the usage log can be traced back to a stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct Attribution {
    /// Static string like "stage1::generate" or "stage2::validation".
    pub caller: &'static str,
    /// Slug of the prompt template the request was rendered from.
    pub template: Option<&'static str>,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self {
            caller,
            template: None,
        }
    }

    pub fn with_template(mut self, slug: &'static str) -> Self {
        self.template = Some(slug);
        self
    }
}

// =============================================================================
// REQUEST
// =============================================================================

/// Request for one `generateContent` call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Model id, e.g. "gemini-2.5-flash".
    pub model: String,
    /// Full prompt text, sent as a single user part.
    pub prompt: String,
    /// Sampling temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_output_tokens: Option<u32>,
    /// Whether to request `application/json` output.
    pub json_mode: bool,
    /// Attribution for usage tracking.
    pub attribution: Attribution,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, attribution: Attribution) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            temperature: 0.0,
            max_output_tokens: None,
            json_mode: false,
            attribution,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

// =============================================================================
// RESPONSE
// =============================================================================

/// A single content part. Models usually emit `text`; some endpoints return
/// an already-structured payload in `json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            json: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Raw response from the generation API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// Time taken for the request. Not part of the wire format.
    #[serde(skip)]
    pub latency: Duration,
}

impl GenerateResponse {
    /// Response wrapping a single text part. Handy for tests and fakes.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            candidates: vec![Candidate {
                content: Some(Content {
                    parts: vec![Part::text(text)],
                }),
                finish_reason: Some("STOP".into()),
            }],
            latency: Duration::ZERO,
        }
    }

    /// Parts of the first candidate, empty if there is none.
    pub fn first_parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_sets_fields() {
        let req = GenerateRequest::new("gemini-2.5-flash", "hi", Attribution::new("test"))
            .temperature(0.7)
            .max_output_tokens(1024)
            .json();
        assert_eq!(req.model, "gemini-2.5-flash");
        assert!((req.temperature - 0.7).abs() < 1e-6);
        assert_eq!(req.max_output_tokens, Some(1024));
        assert!(req.json_mode);
    }

    #[test]
    fn response_decodes_candidate_parts() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"a"},{"text":"b"}]},"finishReason":"STOP"}]}"#;
        let resp: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.first_parts().len(), 2);
        assert_eq!(resp.candidates[0].finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn response_without_candidates_has_no_parts() {
        let resp: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.first_parts().is_empty());
    }
}
