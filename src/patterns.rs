//! Regex-based specification mining, the last resort before hardcoded
//! defaults in Stage 2.
//!
//! All heuristic extractors share one table of `(label, matcher,
//! value_split)` rows so that every fallback path mines pages the same way.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::fetch::PageText;
use crate::normalize::NameNormalizer;
use crate::types::{dedupe_options, option_key, Isq};

/// A spec must be seen on this many distinct pages to count.
pub const MIN_URLS: usize = 2;
/// A spec must have this many distinct values across pages to count.
pub const MIN_VALUES: usize = 2;
/// Options kept per mined spec.
pub const MAX_OPTIONS: usize = 8;

const MAX_VALUE_CHARS: usize = 32;
const MAX_VALUE_WORDS: usize = 5;

#[derive(Debug, Clone)]
pub struct SpecPattern {
    /// Display name of the mined spec.
    pub label: &'static str,
    /// Must capture the raw value text in group 1.
    pub matcher: Regex,
    /// Splits a captured value into individual options.
    pub value_split: Regex,
}

impl SpecPattern {
    /// Pattern for `<label words> <separator> <value up to end of line>`.
    fn labelled(label: &'static str, label_regex: &str, split: &str) -> Self {
        let matcher = format!(r"(?im)\b(?:{label_regex})\b\s*[:=\-–]\s*([^\n;|]{{1,80}})");
        Self {
            label,
            matcher: Regex::new(&matcher).expect("Invalid spec pattern regex"),
            value_split: Regex::new(split).expect("Invalid value split regex"),
        }
    }

    /// Every option this pattern finds in `text`, in order of appearance.
    pub fn values_in(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        for caps in self.matcher.captures_iter(text) {
            let Some(raw) = caps.get(1) else { continue };
            for piece in self.value_split.split(raw.as_str()) {
                if let Some(value) = clean_value(piece, self.label) {
                    out.push(value);
                }
            }
        }
        out
    }
}

const LIST_SPLIT: &str = r"\s*(?:,|/|\bor\b|\band\b|&)\s*";
const COMMA_SPLIT: &str = r"\s*(?:,|\bor\b)\s*";

/// The shared heuristic table.
pub static DEFAULT_PATTERNS: Lazy<Vec<SpecPattern>> = Lazy::new(|| {
    vec![
        SpecPattern::labelled("Material Grade", r"material\s+grade|grade|material", LIST_SPLIT),
        SpecPattern::labelled("Thickness", r"thickness|thk", LIST_SPLIT),
        SpecPattern::labelled("Size", r"sizes?", COMMA_SPLIT),
        SpecPattern::labelled("Dimensions", r"dimensions?", COMMA_SPLIT),
        SpecPattern::labelled("Finish", r"surface\s+finish|finish(?:ing)?", LIST_SPLIT),
        SpecPattern::labelled("Brand", r"brand", LIST_SPLIT),
        SpecPattern::labelled("Capacity", r"capacity", COMMA_SPLIT),
        SpecPattern::labelled("Color", r"colou?rs?", LIST_SPLIT),
        SpecPattern::labelled("Certification", r"certifications?|certified", LIST_SPLIT),
        SpecPattern::labelled("Shape", r"shape", LIST_SPLIT),
    ]
});

/// Trim and sanity-check one captured value.
fn clean_value(piece: &str, label: &str) -> Option<String> {
    let value = piece
        .trim()
        .trim_matches(|c: char| matches!(c, '.' | ':' | '-' | '(' | ')' | '"' | '\''))
        .trim();
    if value.is_empty()
        || value.chars().count() > MAX_VALUE_CHARS
        || value.split_whitespace().count() > MAX_VALUE_WORDS
        || value.eq_ignore_ascii_case(label)
    {
        return None;
    }
    Some(value.to_string())
}

/// A spec that survived the cross-page thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinedSpec {
    pub label: String,
    /// Distinct pages the pattern matched on.
    pub url_count: usize,
    /// Distinct values, most frequent first, capped at [`MAX_OPTIONS`].
    pub options: Vec<String>,
    /// Distinct values before the cap.
    pub distinct_values: usize,
}

/// Run every pattern against every page and keep the specs that appear on
/// at least [`MIN_URLS`] pages with at least [`MIN_VALUES`] distinct values.
/// Result is ranked by page frequency, then distinct values, then table
/// order.
pub fn mine_pages(patterns: &[SpecPattern], pages: &[PageText]) -> Vec<MinedSpec> {
    let mut mined: Vec<(usize, MinedSpec)> = Vec::new();

    for (table_idx, pattern) in patterns.iter().enumerate() {
        let mut urls: HashSet<&str> = HashSet::new();
        // key -> (first display form, occurrences, first seen position)
        let mut values: HashMap<String, (String, usize, usize)> = HashMap::new();
        let mut position = 0usize;

        for page in pages.iter().filter(|p| !p.is_empty()) {
            let found = pattern.values_in(&page.text);
            if found.is_empty() {
                continue;
            }
            urls.insert(page.url.as_str());
            for value in found {
                let entry = values
                    .entry(option_key(&value))
                    .or_insert_with(|| (value.clone(), 0, position));
                entry.1 += 1;
                position += 1;
            }
        }

        if urls.len() < MIN_URLS || values.len() < MIN_VALUES {
            continue;
        }

        let mut ranked: Vec<(String, usize, usize)> = values.into_values().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        let distinct_values = ranked.len();

        mined.push((
            table_idx,
            MinedSpec {
                label: pattern.label.to_string(),
                url_count: urls.len(),
                options: ranked
                    .into_iter()
                    .take(MAX_OPTIONS)
                    .map(|(display, _, _)| display)
                    .collect(),
                distinct_values,
            },
        ));
    }

    mined.sort_by(|(ia, a), (ib, b)| {
        b.url_count
            .cmp(&a.url_count)
            .then(b.distinct_values.cmp(&a.distinct_values))
            .then(ia.cmp(ib))
    });
    mined.into_iter().map(|(_, spec)| spec).collect()
}

/// Most frequent mined spec becomes `config`; the next three whose names do
/// not normalize to an already chosen name become `keys`.
pub fn select_isqs(mined: &[MinedSpec], normalizer: &NameNormalizer) -> Option<(Isq, Vec<Isq>)> {
    let (first, rest) = mined.split_first()?;
    let config = Isq::new(first.label.clone(), first.options.clone());

    let mut taken = vec![normalizer.normalize(&config.name)];
    let mut keys = Vec::new();
    for spec in rest {
        if keys.len() == 3 {
            break;
        }
        let key = normalizer.normalize(&spec.label);
        if key.is_empty() || taken.contains(&key) {
            continue;
        }
        taken.push(key);
        keys.push(Isq::new(spec.label.clone(), spec.options.clone()));
    }
    Some((config, keys))
}

/// What the pattern table found on one page, kept as audit evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEvidence {
    pub url: String,
    /// Characters of visible text; `0` means the fetch failed or was empty.
    pub chars: usize,
    pub specs: Vec<Isq>,
}

/// Per-page pattern hits, without any cross-page thresholds.
pub fn page_evidence(patterns: &[SpecPattern], pages: &[PageText]) -> Vec<PageEvidence> {
    pages
        .iter()
        .map(|page| PageEvidence {
            url: page.url.clone(),
            chars: page.text.chars().count(),
            specs: patterns
                .iter()
                .filter_map(|pattern| {
                    let values = dedupe_options(pattern.values_in(&page.text));
                    (!values.is_empty()).then(|| Isq::new(pattern.label, values))
                })
                .collect(),
        })
        .collect()
}
