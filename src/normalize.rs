//! Specification-name normalization.
//!
//! Stage 1 and Stage 2 name the same specification in slightly different
//! ways ("Sheet Thickness", "Thk", "Plate Type"). The normalized key is the
//! only equality used to decide that two specs are "the same"; it is never
//! shown to users.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Substring rules applied to a lowercased name.
///
/// `strip` entries are deleted outright, then each `rewrite` pair replaces its
/// left side with its right side. Both are plain substrings, not words.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeRules {
    #[serde(default)]
    pub strip: Vec<String>,
    #[serde(default)]
    pub rewrite: Vec<(String, String)>,
}

impl Default for NormalizeRules {
    fn default() -> Self {
        Self {
            strip: vec!["sheet".into(), "plate".into(), "material".into()],
            rewrite: vec![
                ("perforation".into(), "hole".into()),
                ("thk".into(), "thickness".into()),
                ("type".into(), "shape".into()),
            ],
        }
    }
}

/// Keys that keep growing past this length are treated as unmatchable.
const MAX_KEY_LEN: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct NameNormalizer {
    rules: NormalizeRules,
}

impl NameNormalizer {
    pub fn new(rules: NormalizeRules) -> Self {
        let rules = NormalizeRules {
            strip: rules
                .strip
                .into_iter()
                .map(|s| s.to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            rewrite: rules
                .rewrite
                .into_iter()
                .map(|(from, to)| (from.to_lowercase(), to.to_lowercase()))
                .filter(|(from, to)| !from.is_empty() && !to.contains(from.as_str()))
                .collect(),
        };
        Self { rules }
    }

    pub fn rules(&self) -> &NormalizeRules {
        &self.rules
    }

    /// Canonical comparison key for `name`. Empty input gives `""`.
    ///
    /// Rules are applied until nothing changes. A rule table that cycles
    /// yields the smallest key on the cycle, and one that grows without
    /// settling yields `""`. Either way `normalize(normalize(x)) == normalize(x)`.
    pub fn normalize(&self, name: &str) -> String {
        let mut current = collapse_whitespace(&name.to_lowercase());
        let mut seen: Vec<String> = Vec::new();
        loop {
            let next = self.apply_once(&current);
            if next == current {
                return current;
            }
            if next.len() > current.len() && next.len() > MAX_KEY_LEN {
                return String::new();
            }
            if let Some(start) = seen.iter().position(|s| *s == next) {
                let mut cycle = seen.split_off(start);
                cycle.push(current);
                return cycle.into_iter().min().unwrap_or_default();
            }
            seen.push(current);
            current = next;
        }
    }

    fn apply_once(&self, input: &str) -> String {
        let mut out = input.to_string();
        for s in &self.rules.strip {
            out = out.replace(s.as_str(), "");
        }
        for (from, to) in &self.rules.rewrite {
            out = out.replace(from.as_str(), to);
        }
        collapse_whitespace(&out)
    }

    /// True when both names are non-empty and share a key.
    pub fn same(&self, a: &str, b: &str) -> bool {
        let ka = self.normalize(a);
        !ka.is_empty() && ka == self.normalize(b)
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

static DEFAULT_NORMALIZER: Lazy<NameNormalizer> = Lazy::new(NameNormalizer::default);

/// Normalize with the default rule table.
pub fn normalize(name: &str) -> String {
    DEFAULT_NORMALIZER.normalize(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thickness_variants_collide() {
        let a = normalize("Thk");
        assert_eq!(a, normalize("Thickness"));
        assert_eq!(a, normalize(" THK "));
        assert_eq!(a, "thickness");
    }

    #[test]
    fn strips_and_rewrites() {
        assert_eq!(normalize("Sheet Thickness"), "thickness");
        assert_eq!(normalize("Plate Type"), "shape");
        assert_eq!(normalize("Perforation   Pattern"), "hole pattern");
        assert_eq!(normalize("Material Grade"), "grade");
        assert_eq!(normalize("Material"), "");
    }

    #[test]
    fn blank_names_are_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn idempotent_on_adversarial_inputs() {
        let nested = format!("{}sheet{}", "sh".repeat(10), "eet".repeat(10));
        for s in [
            "shsheeteet",
            nested.as_str(),
            "tymaterialpe",
            "Plate Plate  TYPE thk",
            "perforation type",
            "MATERIAL material sheet",
            "  mixed\tWhite\nSpace ",
        ] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn custom_rules_apply() {
        let n = NameNormalizer::new(NormalizeRules {
            strip: vec!["Steel".into()],
            rewrite: vec![("colour".into(), "color".into())],
        });
        assert_eq!(n.normalize("Steel Colour"), "color");
        assert!(n.same("colour", "Color"));
        assert!(!n.same("", ""));
    }

    #[test]
    fn self_referential_rewrite_is_dropped() {
        let n = NameNormalizer::new(NormalizeRules {
            strip: vec![],
            rewrite: vec![("a".into(), "aa".into())],
        });
        assert_eq!(n.normalize("a"), "a");
    }

    #[test]
    fn deeply_nested_strips_settle() {
        let nested = format!("{}sheet{}", "sh".repeat(10), "eet".repeat(10));
        assert_eq!(normalize(&nested), "");
        assert_eq!(normalize(&format!("{nested} grade")), "grade");
    }

    #[test]
    fn cyclic_rewrites_pick_the_smallest_key() {
        let n = NameNormalizer::new(NormalizeRules {
            strip: vec![],
            rewrite: vec![
                ("c".into(), "a".into()),
                ("b".into(), "c".into()),
                ("a".into(), "b".into()),
            ],
        });
        for s in ["a", "b", "c"] {
            assert_eq!(n.normalize(s), "b", "cycle entered from {s:?}");
        }
        assert_eq!(n.normalize(&n.normalize("c")), n.normalize("c"));
    }

    #[test]
    fn unbounded_growth_is_empty() {
        let n = NameNormalizer::new(NormalizeRules {
            strip: vec![],
            rewrite: vec![("a".into(), "bc".into()), ("c".into(), "a".into())],
        });
        assert_eq!(n.normalize("a"), "");
        assert_eq!(n.normalize("b"), "b");
        assert!(!n.same("a", "a"));
    }
}
