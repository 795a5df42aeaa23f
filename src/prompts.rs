//! Prompt templates for the three stages.
//!
//! Templates are plain `&'static str` with `{placeholder}` slots. Anything
//! that comes from a caller or a seller page is XML-escaped before it is
//! substituted, so page text cannot close the tags it is wrapped in.

use crate::fetch::{truncate_chars, PageText};
use crate::stage3::CommonSpec;
use crate::types::{Category, Stage1Input};

/// Escape XML special characters to prevent prompt injection via tag breaking.
fn escape_xml_chars(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// A prompt template with placeholders.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub body: &'static str,
}

impl PromptTemplate {
    /// Substitute `(placeholder, value)` pairs in one pass over the body.
    /// Values are inserted as given and never rescanned; unknown `{...}`
    /// spans are kept literally.
    fn fill(&self, vars: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.body.len());
        let mut rest = self.body;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open + 1..];
            let hit = tail.find('}').and_then(|close| {
                let name = &tail[..close];
                vars.iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, value)| (*value, close))
            });
            match hit {
                Some((value, close)) => {
                    out.push_str(value);
                    rest = &tail[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = tail;
                }
            }
        }
        out.push_str(rest);
        out.trim().to_string()
    }
}

fn category_lines(mcats: &[Category]) -> String {
    mcats
        .iter()
        .map(|m| {
            format!(
                "- mcat_name: \"{}\", mcat_id: \"{}\"",
                escape_xml_chars(m.name.trim()),
                escape_xml_chars(m.id.trim())
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// =============================================================================
// Stage 1
// =============================================================================

pub const STAGE1: PromptTemplate = PromptTemplate {
    slug: "stage1_v1",
    body: r#"You are a B2B marketplace taxonomy expert. Build the seller specification schema for the product categories below.

<pmcat>
pmcat_name: "{pmcat_name}", pmcat_id: "{pmcat_id}"
</pmcat>

<mcats>
{mcat_lines}
</mcats>

Rules:
1. Output every MCAT listed above exactly once, with the same mcat_name and mcat_id. Do not add MCATs.
2. For each MCAT give three tiers:
   - primary_specs: 2 to 3 specs that drive price or define the product.
   - secondary_specs: 2 to 3 specs buyers commonly filter on.
   - tertiary_specs: 0 to 4 specs that are nice to know.
3. input_type is "radio_button" when a buyer picks exactly one value (grade, thickness) and "multi_select" when several can apply (applications, certifications).
4. Only primary specs may use affix_flag "Prefix" or "Suffix" (where the value reads naturally before or after the product name in a title, e.g. "304 Stainless Steel Sheet"). affix_presence_flag is "1" when affix_flag is not "None", else "0". Every secondary and tertiary spec uses affix_flag "None" and affix_presence_flag "0".
5. Give at most 10 options per spec. Each option is at most 25 characters, uses standard units, and contains no marketing text.
6. Use the same spec name for the same concept across related MCATs (always "Thickness", never "Thk" in one and "Sheet Thickness" in another).
7. Never repeat a spec within an MCAT.

Return ONLY JSON in exactly this shape:
{"seller_specs":[{"pmcat_name":"...","pmcat_id":"...","mcats":[{"mcat_name":"...","mcat_id":"...","primary_specs":[{"spec_name":"...","options":["..."],"input_type":"radio_button","affix_flag":"None","affix_presence_flag":"0"}],"secondary_specs":[],"tertiary_specs":[]}]}]}"#,
};

pub fn render_stage1(input: &Stage1Input) -> String {
    STAGE1.fill(&[
        ("pmcat_name", &escape_xml_chars(input.pmcat.name.trim())),
        ("pmcat_id", &escape_xml_chars(input.pmcat.id.trim())),
        ("mcat_lines", &category_lines(&input.mcats)),
    ])
}

// =============================================================================
// Stage 2
// =============================================================================

/// The three Stage 2 prompt attempts, tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage2Attempt {
    First,
    Validation,
    Fallback,
}

impl Stage2Attempt {
    pub const ALL: [Stage2Attempt; 3] = [
        Stage2Attempt::First,
        Stage2Attempt::Validation,
        Stage2Attempt::Fallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage2Attempt::First => "first",
            Stage2Attempt::Validation => "validation",
            Stage2Attempt::Fallback => "fallback",
        }
    }

    pub fn temperature(&self) -> f32 {
        match self {
            Stage2Attempt::First | Stage2Attempt::Validation => 0.7,
            Stage2Attempt::Fallback => 0.3,
        }
    }

    pub fn template(&self) -> PromptTemplate {
        match self {
            Stage2Attempt::First => STAGE2_FIRST,
            Stage2Attempt::Validation => STAGE2_VALIDATION,
            Stage2Attempt::Fallback => STAGE2_FALLBACK,
        }
    }

    /// Characters of each page embedded in the prompt.
    pub fn page_budget(&self) -> usize {
        match self {
            Stage2Attempt::First | Stage2Attempt::Validation => 6_000,
            Stage2Attempt::Fallback => 3_000,
        }
    }
}

pub const STAGE2_FIRST: PromptTemplate = PromptTemplate {
    slug: "stage2_first_v1",
    body: r#"You are analysing seller web pages for the product category "{pmcat_name}" (sub-categories: {mcat_names}).

Read every page below and identify the specifications that sellers actually list, with the values they actually offer.

{pages}

Choose:
- config: the ONE specification that most determines price (for metals this is usually grade or material). It needs at least 2 options.
- keys: exactly THREE other specifications that best define the product for a buyer. Each needs at least 2 options.

Rules:
- Use only specifications and values that appear in the pages. Prefer those that appear on several pages.
- Spec names are short and generic ("Thickness", not "Sheet Thickness (mm)").
- Options are short values with units ("2 mm", "4 x 8 ft"), at most 8 per spec, no duplicates.
- config and the three keys must all be different specifications.

Return ONLY JSON:
{"config":{"name":"...","options":["...","..."]},"keys":[{"name":"...","options":["...","..."]},{"name":"...","options":["...","..."]},{"name":"...","options":["...","..."]}]}"#,
};

pub const STAGE2_VALIDATION: PromptTemplate = PromptTemplate {
    slug: "stage2_validation_v1",
    body: r#"Extract product specifications for "{pmcat_name}" from the seller pages below. A previous extraction was rejected, so follow the requirements strictly.

{pages}

Requirements (every one is checked):
1. "config" has a non-empty "name" and at least 2 "options".
2. "keys" has exactly 3 entries, each with a non-empty "name" and at least 2 "options".
3. The 4 names are all different specifications. Do not reuse config as a key, and do not list the same spec twice under different wording.
4. Options are plain strings taken from the pages.

Return ONLY this JSON and nothing else:
{"config":{"name":"","options":[]},"keys":[{"name":"","options":[]},{"name":"","options":[]},{"name":"","options":[]}]}"#,
};

pub const STAGE2_FALLBACK: PromptTemplate = PromptTemplate {
    slug: "stage2_fallback_v1",
    body: r#"Product: {pmcat_name}

{pages}

List 4 different specifications of this product with at least 2 values each. The first is the one that most affects price.

JSON only:
{"config":{"name":"","options":[]},"keys":[{"name":"","options":[]},{"name":"","options":[]},{"name":"","options":[]}]}"#,
};

fn page_blocks(pages: &[PageText], budget: usize) -> String {
    let blocks: Vec<String> = pages
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| {
            format!(
                "<page url=\"{}\">\n{}\n</page>",
                escape_xml_chars(&p.url),
                escape_xml_chars(truncate_chars(p.text.trim(), budget))
            )
        })
        .collect();

    if blocks.is_empty() {
        "<pages>\n(no readable page text; use typical specifications for this category)\n</pages>"
            .to_string()
    } else {
        format!("<pages>\n{}\n</pages>", blocks.join("\n"))
    }
}

pub fn render_stage2(attempt: Stage2Attempt, input: &Stage1Input, pages: &[PageText]) -> String {
    let mcat_names = input
        .mcats
        .iter()
        .map(|m| escape_xml_chars(m.name.trim()))
        .collect::<Vec<_>>()
        .join(", ");

    attempt.template().fill(&[
        ("pmcat_name", &escape_xml_chars(input.pmcat.name.trim())),
        ("mcat_names", &mcat_names),
        ("pages", &page_blocks(pages, attempt.page_budget())),
    ])
}

// =============================================================================
// Stage 3
// =============================================================================

pub const STAGE3: PromptTemplate = PromptTemplate {
    slug: "stage3_v1",
    body: r#"Two independent processes produced specifications for the same product. The specifications both of them found are listed below with their importance tier and the options each process gave.

<common_specs>
{common_lines}
</common_specs>

Select at most 2 buyer-facing specifications from this list only:
- Prefer two Primary specs; otherwise one Primary and one Secondary; otherwise two Secondary; otherwise any two.
- Keep each name exactly as written above.
- Options: first those present in both lists, then those only in "stage2", then those only in "stage1". No duplicates, at most 8.

Return ONLY JSON:
{"buyer_isqs":[{"name":"...","options":["..."]}]}"#,
};

pub fn render_stage3(common: &[CommonSpec]) -> String {
    let lines = common
        .iter()
        .map(|c| {
            format!(
                "- name: \"{}\", tier: {}, stage1: [{}], stage2: [{}]",
                escape_xml_chars(&c.name),
                c.tier.as_str(),
                quoted_list(&c.stage1_options),
                quoted_list(&c.stage2_options)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    STAGE3.fill(&[("common_lines", &lines)])
}

fn quoted_list(options: &[String]) -> String {
    options
        .iter()
        .map(|o| format!("\"{}\"", escape_xml_chars(o)))
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// TESTS
// =============================================================================
