//! Pull a JSON payload out of a free-form model response.
//!
//! Models asked for JSON still wrap it in fences, prepend prose, or leave a
//! trailing comma. Every step here is best-effort; failure is `None`, never a
//! panic or error, so callers can move on to their next strategy.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::gateway::GenerateResponse;

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)```(?:json)?").expect("Invalid fence regex"));

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*[}\]])").expect("Invalid trailing comma regex"));

/// Decode the payload of a generation response.
///
/// Steps, stopping at the first that yields a value:
/// 1. no candidate content → `None`
/// 2. a part carrying a structured `json` field → that value
/// 3. concatenated text parts → [`parse_model_json`]
pub fn extract_payload(resp: &GenerateResponse) -> Option<Value> {
    let parts = resp.first_parts();
    if parts.is_empty() {
        return None;
    }

    if let Some(json) = parts.iter().find_map(|p| p.json.clone()) {
        return Some(json);
    }

    let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
    parse_model_json(&text)
}

/// Decode a response straight into `T`. Shape mismatches are `None`.
pub fn extract_as<T: DeserializeOwned>(resp: &GenerateResponse) -> Option<T> {
    extract_payload(resp).and_then(|v| serde_json::from_value(v).ok())
}

/// Parse model text into JSON: strip fences, slice the outermost object,
/// drop trailing commas, parse.
pub fn parse_model_json(raw: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return None;
    }

    let unfenced = FENCE.replace_all(raw, "");
    let object = outer_object(&unfenced)?;
    let repaired = TRAILING_COMMA.replace_all(object, "$1");

    serde_json::from_str(&repaired).ok()
}

/// Substring from the first `{` to the last `}`, inclusive.
fn outer_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}
