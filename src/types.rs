//! Data model shared by the three stages.
//!
//! Everything here is produced by a model at some point, so decoding is
//! lenient: unknown enum strings become `None`, numbers in option lists are
//! stringified, and missing lists default to empty.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

// =============================================================================
// Enums
// =============================================================================

/// Importance / price impact of a specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Tier {
    Primary,
    Secondary,
    Tertiary,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Primary, Tier::Secondary, Tier::Tertiary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Primary => "Primary",
            Tier::Secondary => "Secondary",
            Tier::Tertiary => "Tertiary",
        }
    }

    /// Upper bound on specs per MCAT in this tier.
    pub fn max_specs(&self) -> usize {
        match self {
            Tier::Primary | Tier::Secondary => 3,
            Tier::Tertiary => 4,
        }
    }

    /// Lower bound on specs per MCAT in this tier.
    pub fn min_specs(&self) -> usize {
        match self {
            Tier::Primary | Tier::Secondary => 2,
            Tier::Tertiary => 0,
        }
    }
}

impl FromStr for Tier {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "primary" => Ok(Tier::Primary),
            "secondary" => Ok(Tier::Secondary),
            "tertiary" => Ok(Tier::Tertiary),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    RadioButton,
    MultiSelect,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::RadioButton => "radio_button",
            InputType::MultiSelect => "multi_select",
        }
    }
}

impl FromStr for InputType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "radio_button" | "radio" => Ok(InputType::RadioButton),
            "multi_select" | "multiselect" => Ok(InputType::MultiSelect),
            _ => Err(()),
        }
    }
}

/// How a primary spec's value is woven into a generated product title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AffixFlag {
    None,
    Prefix,
    Suffix,
}

impl AffixFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            AffixFlag::None => "None",
            AffixFlag::Prefix => "Prefix",
            AffixFlag::Suffix => "Suffix",
        }
    }
}

impl FromStr for AffixFlag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(AffixFlag::None),
            "prefix" => Ok(AffixFlag::Prefix),
            "suffix" => Ok(AffixFlag::Suffix),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AffixPresence {
    #[serde(rename = "0")]
    Absent,
    #[serde(rename = "1")]
    Present,
}

impl AffixPresence {
    pub fn as_str(&self) -> &'static str {
        match self {
            AffixPresence::Absent => "0",
            AffixPresence::Present => "1",
        }
    }
}

impl FromStr for AffixPresence {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "0" | "false" | "no" => Ok(AffixPresence::Absent),
            "1" | "true" | "yes" => Ok(AffixPresence::Present),
            _ => Err(()),
        }
    }
}

/// Role an ISQ plays in the final output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsqRole {
    Config,
    Key,
    Buyer,
}

impl fmt::Display for IsqRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IsqRole::Config => "Config",
            IsqRole::Key => "Key",
            IsqRole::Buyer => "Buyer",
        })
    }
}

// =============================================================================
// Lenient decoding helpers
// =============================================================================

fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_enum<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(v.as_ref()
        .and_then(value_to_string)
        .and_then(|s| s.parse().ok()))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(v.as_ref().and_then(value_to_string).unwrap_or_default())
}

fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(match v {
        Some(Value::Array(items)) => items.iter().filter_map(value_to_string).collect(),
        Some(Value::String(s)) => s.split(',').map(|p| p.trim().to_string()).collect(),
        _ => Vec::new(),
    })
}

impl<'de> Deserialize<'de> for Tier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|_| serde::de::Error::custom(format!("unknown tier: {s}")))
    }
}

// =============================================================================
// Option lists
// =============================================================================

/// Comparison key for an option value: lowercase with all whitespace removed,
/// so "2 mm" and "2MM" are the same option.
pub fn option_key(option: &str) -> String {
    option
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Trim, drop empties, and drop later duplicates (by `option_key`).
pub fn dedupe_options<I, S>(options: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for option in options {
        let trimmed = option.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(option_key(trimmed)) {
            out.push(trimmed.to_string());
        }
    }
    out
}

// =============================================================================
// Specs and ISQs
// =============================================================================

/// A tiered specification as produced by Stage 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    #[serde(alias = "spec_name", deserialize_with = "lenient_string", default)]
    pub name: String,
    #[serde(alias = "values", deserialize_with = "lenient_strings", default)]
    pub options: Vec<String>,
    #[serde(default, deserialize_with = "lenient_enum", skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(default, deserialize_with = "lenient_enum", skip_serializing_if = "Option::is_none")]
    pub input_type: Option<InputType>,
    #[serde(default, deserialize_with = "lenient_enum", skip_serializing_if = "Option::is_none")]
    pub affix_flag: Option<AffixFlag>,
    #[serde(default, deserialize_with = "lenient_enum", skip_serializing_if = "Option::is_none")]
    pub affix_presence_flag: Option<AffixPresence>,
}

impl Spec {
    pub fn new<S: Into<String>>(name: impl Into<String>, options: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            options: options.into_iter().map(Into::into).collect(),
            tier: None,
            input_type: None,
            affix_flag: None,
            affix_presence_flag: None,
        }
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }
}

/// Item Specification Question: a named spec with ordered options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Isq {
    #[serde(alias = "spec_name", deserialize_with = "lenient_string", default)]
    pub name: String,
    #[serde(alias = "values", deserialize_with = "lenient_strings", default)]
    pub options: Vec<String>,
}

impl Isq {
    pub fn new<S: Into<String>>(name: impl Into<String>, options: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    /// Same ISQ with a trimmed name and deduplicated options.
    pub fn cleaned(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            options: dedupe_options(&self.options),
        }
    }
}

// =============================================================================
// Stage inputs
// =============================================================================

/// A PMCAT or MCAT reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
}

impl Category {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

/// Categories a run generates specifications for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage1Input {
    pub pmcat: Category,
    pub mcats: Vec<Category>,
}

// =============================================================================
// Stage 1 output
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McatSpecs {
    #[serde(alias = "category_name", deserialize_with = "lenient_string", default)]
    pub mcat_name: String,
    #[serde(alias = "category_id", deserialize_with = "lenient_string", default)]
    pub mcat_id: String,
    #[serde(default)]
    pub primary_specs: Vec<Spec>,
    #[serde(default)]
    pub secondary_specs: Vec<Spec>,
    #[serde(default)]
    pub tertiary_specs: Vec<Spec>,
}

impl McatSpecs {
    pub fn empty(category: &Category) -> Self {
        Self {
            mcat_name: category.name.clone(),
            mcat_id: category.id.clone(),
            primary_specs: Vec::new(),
            secondary_specs: Vec::new(),
            tertiary_specs: Vec::new(),
        }
    }

    pub fn tier(&self, tier: Tier) -> &[Spec] {
        match tier {
            Tier::Primary => &self.primary_specs,
            Tier::Secondary => &self.secondary_specs,
            Tier::Tertiary => &self.tertiary_specs,
        }
    }

    fn tier_mut(&mut self, tier: Tier) -> &mut Vec<Spec> {
        match tier {
            Tier::Primary => &mut self.primary_specs,
            Tier::Secondary => &mut self.secondary_specs,
            Tier::Tertiary => &mut self.tertiary_specs,
        }
    }

    /// All specs with the tier they were listed under, primary first.
    pub fn iter_specs(&self) -> impl Iterator<Item = (Tier, &Spec)> {
        Tier::ALL
            .into_iter()
            .flat_map(move |tier| self.tier(tier).iter().map(move |s| (tier, s)))
    }

    fn matches(&self, category: &Category) -> bool {
        let id = self.mcat_id.trim();
        if !id.is_empty() && !category.id.trim().is_empty() {
            return id == category.id.trim();
        }
        self.mcat_name.trim().eq_ignore_ascii_case(category.name.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PmcatSpecs {
    #[serde(default, deserialize_with = "lenient_string")]
    pub pmcat_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub pmcat_id: String,
    #[serde(default)]
    pub mcats: Vec<McatSpecs>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage1Output {
    #[serde(default)]
    pub seller_specs: Vec<PmcatSpecs>,
}

impl Stage1Output {
    pub fn is_empty(&self) -> bool {
        self.seller_specs.iter().all(|p| p.mcats.is_empty())
    }

    /// Every spec across all PMCATs, MCATs and tiers.
    pub fn iter_specs(&self) -> impl Iterator<Item = (Tier, &Spec)> {
        self.seller_specs
            .iter()
            .flat_map(|p| p.mcats.iter())
            .flat_map(|m| m.iter_specs())
    }

    /// Force the model's output into the shape the rest of the pipeline
    /// relies on:
    /// - one PMCAT record for the input PMCAT
    /// - each input MCAT exactly once, in input order (missing ones empty)
    /// - tiers clamped to their maximum size and stamped with their tier
    /// - affix flags only on primary specs
    /// - spec options deduplicated
    pub fn conform(self, input: &Stage1Input) -> Stage1Output {
        let mut produced: Vec<McatSpecs> =
            self.seller_specs.into_iter().flat_map(|p| p.mcats).collect();

        let mut mcats = Vec::with_capacity(input.mcats.len());
        for category in &input.mcats {
            let found = produced
                .iter()
                .position(|m| m.matches(category))
                .map(|idx| produced.remove(idx));
            let mut mcat = match found {
                Some(m) => m,
                None => {
                    warn!(mcat = %category.name, "model omitted MCAT; inserting empty entry");
                    McatSpecs::empty(category)
                }
            };
            mcat.mcat_name = category.name.clone();
            mcat.mcat_id = category.id.clone();
            conform_tiers(&mut mcat);
            mcats.push(mcat);
        }

        if !produced.is_empty() {
            warn!(
                dropped = produced.len(),
                "model returned MCATs that were not requested or were duplicated"
            );
        }

        Stage1Output {
            seller_specs: vec![PmcatSpecs {
                pmcat_name: input.pmcat.name.clone(),
                pmcat_id: input.pmcat.id.clone(),
                mcats,
            }],
        }
    }
}

fn conform_tiers(mcat: &mut McatSpecs) {
    for tier in Tier::ALL {
        let mcat_name = mcat.mcat_name.clone();
        let specs = mcat.tier_mut(tier);
        specs.retain(|s| !s.name.trim().is_empty());
        if specs.len() > tier.max_specs() {
            specs.truncate(tier.max_specs());
        }
        if specs.len() < tier.min_specs() {
            warn!(
                mcat = %mcat_name,
                tier = tier.as_str(),
                count = specs.len(),
                "tier has fewer specs than expected"
            );
        }
        for spec in specs.iter_mut() {
            spec.name = spec.name.trim().to_string();
            spec.options = dedupe_options(&spec.options);
            spec.tier = Some(tier);
            if tier != Tier::Primary {
                spec.affix_flag = Some(AffixFlag::None);
                spec.affix_presence_flag = Some(AffixPresence::Absent);
            }
        }
    }
}

// =============================================================================
// Stage 2 output
// =============================================================================

/// One price-determining `config` ISQ and three category-defining `key` ISQs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage2Output {
    #[serde(alias = "config_isq", alias = "config_specification")]
    pub config: Isq,
    #[serde(default, alias = "key_isqs", alias = "key_specifications")]
    pub keys: Vec<Isq>,
}

impl Stage2Output {
    /// Config followed by keys, with their roles.
    pub fn iter_isqs(&self) -> impl Iterator<Item = (IsqRole, &Isq)> {
        std::iter::once((IsqRole::Config, &self.config))
            .chain(self.keys.iter().map(|k| (IsqRole::Key, k)))
    }
}
