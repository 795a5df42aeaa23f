//! Tabular and JSON export of a finished run.
//!
//! Three fixed sheets, written as one CSV file each:
//! - "Master Spec List": every Stage 1 spec, one row per MCAT and tier
//! - "Website Evidence": per-page pattern hits from the seller pages
//! - "Final ISQs": config, key and buyer ISQs

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::patterns::PageEvidence;
use crate::pipeline::PipelineSession;
use crate::types::{Category, Isq, IsqRole, Stage1Output, Stage2Output};

pub const MASTER_SHEET: &str = "Master Spec List";
pub const EVIDENCE_SHEET: &str = "Website Evidence";
pub const FINAL_SHEET: &str = "Final ISQs";

const OPTION_SEPARATOR: &str = "; ";

/// The consolidated ISQ table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalIsqs {
    pub config: Isq,
    pub keys: Vec<Isq>,
    pub buyers: Vec<Isq>,
}

impl FinalIsqs {
    pub fn new(stage2: &Stage2Output, buyers: &[Isq]) -> Self {
        Self {
            config: stage2.config.clone(),
            keys: stage2.keys.clone(),
            buyers: buyers.to_vec(),
        }
    }

    pub fn iter_roles(&self) -> impl Iterator<Item = (IsqRole, &Isq)> {
        std::iter::once((IsqRole::Config, &self.config))
            .chain(self.keys.iter().map(|k| (IsqRole::Key, k)))
            .chain(self.buyers.iter().map(|b| (IsqRole::Buyer, b)))
    }
}

/// Everything the export writes, in its JSON shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub pmcat: Category,
    pub generated_at: DateTime<Utc>,
    pub stage1: Stage1Output,
    pub isqs: FinalIsqs,
    #[serde(default)]
    pub evidence: Vec<PageEvidence>,
}

/// One named table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sheet {
    pub name: &'static str,
    pub headers: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

impl ExportBundle {
    pub fn new(pmcat: Category, stage1: Stage1Output, isqs: FinalIsqs, generated_at: DateTime<Utc>) -> Self {
        Self {
            pmcat,
            generated_at,
            stage1,
            isqs,
            evidence: Vec::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: Vec<PageEvidence>) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn from_session(session: &PipelineSession) -> Self {
        Self::new(
            session.request.pmcat.clone(),
            session.stage1.clone(),
            FinalIsqs::new(&session.stage2, &session.buyers),
            session.created_at,
        )
        .with_evidence(session.evidence.clone())
    }

    /// `isq_<pmcat-slug>_<YYYYMMDD-HHMMSS>`
    pub fn file_stem(&self) -> String {
        export_file_stem(&self.pmcat.name, self.generated_at)
    }

    pub fn sheets(&self) -> Vec<Sheet> {
        vec![self.master_sheet(), self.evidence_sheet(), self.final_sheet()]
    }

    fn master_sheet(&self) -> Sheet {
        let mut rows = Vec::new();
        for pmcat in &self.stage1.seller_specs {
            for mcat in &pmcat.mcats {
                for (tier, spec) in mcat.iter_specs() {
                    rows.push(vec![
                        pmcat.pmcat_name.clone(),
                        pmcat.pmcat_id.clone(),
                        mcat.mcat_name.clone(),
                        mcat.mcat_id.clone(),
                        tier.as_str().to_string(),
                        spec.name.clone(),
                        spec.options.join(OPTION_SEPARATOR),
                        spec.input_type.map(|t| t.as_str()).unwrap_or_default().to_string(),
                        spec.affix_flag.map(|f| f.as_str()).unwrap_or_default().to_string(),
                        spec.affix_presence_flag
                            .map(|p| p.as_str())
                            .unwrap_or_default()
                            .to_string(),
                    ]);
                }
            }
        }
        Sheet {
            name: MASTER_SHEET,
            headers: vec![
                "PMCAT",
                "PMCAT ID",
                "MCAT",
                "MCAT ID",
                "Tier",
                "Specification",
                "Options",
                "Input Type",
                "Affix Flag",
                "Affix Presence",
            ],
            rows,
        }
    }

    fn evidence_sheet(&self) -> Sheet {
        let mut rows = Vec::new();
        for page in &self.evidence {
            if page.specs.is_empty() {
                rows.push(vec![
                    page.url.clone(),
                    page.chars.to_string(),
                    String::new(),
                    String::new(),
                ]);
                continue;
            }
            for spec in &page.specs {
                rows.push(vec![
                    page.url.clone(),
                    page.chars.to_string(),
                    spec.name.clone(),
                    spec.options.join(OPTION_SEPARATOR),
                ]);
            }
        }
        Sheet {
            name: EVIDENCE_SHEET,
            headers: vec!["URL", "Characters", "Specification", "Values"],
            rows,
        }
    }

    fn final_sheet(&self) -> Sheet {
        let rows = self
            .isqs
            .iter_roles()
            .map(|(role, isq)| {
                vec![
                    role.to_string(),
                    isq.name.clone(),
                    isq.options.join(OPTION_SEPARATOR),
                ]
            })
            .collect();
        Sheet {
            name: FINAL_SHEET,
            headers: vec!["Role", "Specification", "Options"],
            rows,
        }
    }

    /// Write one CSV per sheet into `dir`, returning the paths in sheet order.
    pub fn write_csv_sheets(&self, dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
        fs::create_dir_all(dir)?;
        let stem = self.file_stem();
        let mut paths = Vec::new();
        for sheet in self.sheets() {
            let path = dir.join(format!("{stem}_{}.csv", slug(sheet.name)));
            let mut w = BufWriter::new(File::create(&path)?);
            write_sheet(&mut w, &sheet)?;
            w.flush()?;
            paths.push(path);
        }
        Ok(paths)
    }

    /// Write the bundle as pretty JSON into `dir`.
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.file_stem()));
        let mut w = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.flush()?;
        Ok(path)
    }
}

/// Descriptive export name: `isq_<pmcat-slug>_<YYYYMMDD-HHMMSS>`.
pub fn export_file_stem(pmcat: &str, timestamp: DateTime<Utc>) -> String {
    format!("isq_{}_{}", slug(pmcat), timestamp.format("%Y%m%d-%H%M%S"))
}

/// Lowercase ASCII alphanumerics joined by single dashes.
fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "category".to_string()
    } else {
        trimmed.to_string()
    }
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Write a single CSV row.
fn write_row<W: Write, S: AsRef<str>>(w: &mut W, row: &[S]) -> io::Result<()> {
    let mut first = true;
    for cell in row {
        if !first {
            write!(w, ",")?;
        } else {
            first = false;
        }
        let cell = cell.as_ref();
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{cell}")?;
        }
    }
    write!(w, "\r\n")
}

fn write_sheet<W: Write>(w: &mut W, sheet: &Sheet) -> io::Result<()> {
    write_row(w, &sheet.headers)?;
    for row in &sheet.rows {
        write_row(w, row)?;
    }
    Ok(())
}
