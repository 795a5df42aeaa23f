#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use isq_harness::config::PipelineConfig;
use isq_harness::export::ExportBundle;
use isq_harness::fetch::HttpPageFetcher;
use isq_harness::gateway::{NoopUsageSink, StderrUsageSink};
use isq_harness::normalize::NameNormalizer;
use isq_harness::patterns::DEFAULT_PATTERNS;
use isq_harness::pipeline::{run_pipeline, PipelineRequest, PipelineSession, StageGateways};
use isq_harness::stage3::{reconcile_with, ReconcileOptions};
use isq_harness::types::{Stage1Output, Stage2Output};
use isq_harness::{compare, stage1, stage2};

#[derive(Parser)]
#[command(name = "isq", version, about = "ISQ taxonomy pipeline CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all three stages for one request
    Run {
        #[arg(long)]
        request: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Also write the spreadsheet sheets and JSON export here
        #[arg(long)]
        export_dir: Option<PathBuf>,
        /// Print one JSON usage record per provider call to stderr
        #[arg(long)]
        usage: bool,
    },
    /// Generate seller specifications only
    Stage1 {
        #[arg(long)]
        request: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Extract config/key ISQs from the request's seller pages
    Stage2 {
        #[arg(long)]
        request: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Select buyer ISQs from saved Stage 1 and Stage 2 outputs (offline)
    Reconcile {
        #[arg(long)]
        stage1: PathBuf,
        #[arg(long)]
        stage2: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Keep fewer than two buyers instead of padding with defaults
        #[arg(long)]
        no_pad: bool,
    },
    /// Compare spec names of two Stage 1 outputs (offline)
    Compare {
        #[arg(long)]
        a: PathBuf,
        #[arg(long)]
        b: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write export sheets for a saved session (offline)
    Export {
        #[arg(long)]
        session: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// List the spec labels the page-mining fallback looks for
    Patterns,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            request,
            out,
            export_dir,
            usage,
        } => {
            let req: PipelineRequest = read_json(&request)?;
            let config = PipelineConfig::from_env()?;
            let gateways = if usage {
                StageGateways::from_config(&config, Arc::new(StderrUsageSink))?
            } else {
                StageGateways::from_config(&config, Arc::new(NoopUsageSink))?
            };
            let fetcher = HttpPageFetcher::new(&config.fetch)?;

            let session = run_pipeline(&gateways, &fetcher, &config, req).await?;
            write_json(&out, &session)?;
            info!(session = %session.id, out = %out.display(), "session written");

            if let Some(dir) = export_dir {
                write_export(&ExportBundle::from_session(&session), &dir)?;
            }
        }
        Commands::Stage1 { request, out } => {
            let req: PipelineRequest = read_json(&request)?;
            req.validate()?;
            let config = PipelineConfig::from_env()?;
            let gateways = StageGateways::from_config(&config, Arc::new(NoopUsageSink))?;

            let output =
                stage1::generate(gateways.stage1.as_ref(), &config, &req.stage1_input()).await?;
            write_json(&out, &output)?;
        }
        Commands::Stage2 { request, out } => {
            let req: PipelineRequest = read_json(&request)?;
            req.validate()?;
            let config = PipelineConfig::from_env()?;
            let gateways = StageGateways::from_config(&config, Arc::new(NoopUsageSink))?;
            let fetcher = HttpPageFetcher::new(&config.fetch)?;

            let (output, source) = stage2::extract_with_source(
                gateways.stage2.as_ref(),
                &fetcher,
                &config,
                &req.stage1_input(),
                &req.urls,
            )
            .await?;
            info!(source = %source, "stage2 result");
            write_json(&out, &output)?;
        }
        Commands::Reconcile {
            stage1,
            stage2,
            out,
            no_pad,
        } => {
            let s1: Stage1Output = read_json(&stage1)?;
            let s2: Stage2Output = read_json(&stage2)?;
            let options = ReconcileOptions {
                pad_with_defaults: !no_pad,
            };
            let buyers = reconcile_with(&s1, &s2, &NameNormalizer::default(), &options);
            write_json(&out, &buyers)?;
        }
        Commands::Compare { a, b, out } => {
            let run_a: Stage1Output = read_json(&a)?;
            let run_b: Stage1Output = read_json(&b)?;
            let cmp = compare(&run_a, &run_b, &NameNormalizer::default());
            if let Some(path) = out {
                write_json(&path, &cmp)?;
            } else {
                println!("{}", serde_json::to_string_pretty(&cmp)?);
            }
            eprintln!(
                "common={} only_a={} only_b={} overlap={:.2}",
                cmp.common.len(),
                cmp.unique_to_a.len(),
                cmp.unique_to_b.len(),
                cmp.overlap()
            );
        }
        Commands::Export { session, out_dir } => {
            let session: PipelineSession = read_json(&session)?;
            write_export(&ExportBundle::from_session(&session), &out_dir)?;
        }
        Commands::Patterns => {
            for pattern in DEFAULT_PATTERNS.iter() {
                println!("{}\t{}", pattern.label, pattern.matcher.as_str());
            }
        }
    }

    Ok(())
}

fn write_export(bundle: &ExportBundle, dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut paths = bundle.write_csv_sheets(dir)?;
    paths.push(bundle.write_json(dir)?);
    for path in paths {
        println!("{}", path.display());
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &PathBuf,
) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: Serialize>(path: &PathBuf, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
