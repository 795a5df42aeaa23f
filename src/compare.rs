//! Cross-run audit: which spec names two Stage 1 runs agree on.

use serde::{Deserialize, Serialize};

use crate::normalize::NameNormalizer;
use crate::types::Stage1Output;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecComparison {
    pub common: Vec<String>,
    pub unique_to_a: Vec<String>,
    pub unique_to_b: Vec<String>,
}

impl SpecComparison {
    /// Share of all distinct names that both runs produced, in `[0, 1]`.
    pub fn overlap(&self) -> f64 {
        let total = self.common.len() + self.unique_to_a.len() + self.unique_to_b.len();
        if total == 0 {
            return 0.0;
        }
        self.common.len() as f64 / total as f64
    }
}

/// Distinct `(key, display name)` pairs in first-seen order.
fn distinct_names(run: &Stage1Output, normalizer: &NameNormalizer) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for (_, spec) in run.iter_specs() {
        let key = normalizer.normalize(&spec.name);
        if key.is_empty() || out.iter().any(|(k, _)| *k == key) {
            continue;
        }
        out.push((key, spec.name.trim().to_string()));
    }
    out
}

/// Set comparison of spec names across all tiers by normalized name.
/// Common names are reported with the display name from `a`.
pub fn compare(a: &Stage1Output, b: &Stage1Output, normalizer: &NameNormalizer) -> SpecComparison {
    let names_a = distinct_names(a, normalizer);
    let names_b = distinct_names(b, normalizer);

    let in_b = |key: &str| names_b.iter().any(|(k, _)| k == key);
    let in_a = |key: &str| names_a.iter().any(|(k, _)| k == key);

    SpecComparison {
        common: names_a
            .iter()
            .filter(|(k, _)| in_b(k))
            .map(|(_, name)| name.clone())
            .collect(),
        unique_to_a: names_a
            .iter()
            .filter(|(k, _)| !in_b(k))
            .map(|(_, name)| name.clone())
            .collect(),
        unique_to_b: names_b
            .iter()
            .filter(|(k, _)| !in_a(k))
            .map(|(_, name)| name.clone())
            .collect(),
    }
}
