//! Parser Service - Consolidates ANS accounting statements into canonical expenses
//!
//! Responsibilities:
//! - Load (fetching once if needed) the operator registry
//! - Read every CSV/TXT/XLSX statement under the input directory
//! - Keep claims-expense rows, normalize them and tag anomalies
//! - Consolidate across files, aggregate clean rows
//! - Write canonical, ledger, summary, aggregated and manifest outputs
//!
//! CRITICAL: This service must be DETERMINISTIC
//! Same inputs + same registry = same output
//!
//! Usage:
//!   cargo run --bin parser -- --input-dir data/extracted --output-dir data/processed

use ans_collector::init_logging;
use ans_parser::output::write_all;
use ans_parser::{ensure_registry, run, Config, RunOutput};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "parser", about = "Consolidates ANS claims expenses into canonical outputs")]
struct Args {
    /// Directory tree holding the extracted statements (overrides INPUT_DIR)
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Where outputs are written (overrides OUTPUT_DIR)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Local registry cache (overrides REGISTRY_PATH)
    #[arg(long)]
    registry_path: Option<PathBuf>,

    /// Registry download URL (overrides REGISTRY_URL)
    #[arg(long)]
    registry_url: Option<String>,

    /// Run without registry enrichment
    #[arg(long, default_value = "false")]
    no_registry: bool,

    /// Run everything but write nothing
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

fn print_summary(run: &RunOutput) {
    let stages = &run.stages;
    println!("\n=== Run Summary ===");
    println!("Files discovered: {}", stages.discovered);
    println!("  processed: {}", stages.processed);
    println!("  skipped:   {}", stages.skipped);
    println!("  errored:   {}", stages.errored);
    println!("Rows emitted:  {}", stages.rows_emitted);
    println!("Rows excluded: {}", stages.rows_excluded);
    println!("Rows flagged:  {}", run.consolidated.ledger.entries.len());
    println!("Aggregated groups: {}", run.aggregated.len());

    let summary = run.consolidated.ledger.summary();
    if summary.is_empty() {
        println!("No issues found");
    } else {
        println!("Issues:");
        for (tag, count) in &summary {
            println!("  {:<32} {}", tag, count);
        }
    }

    for file in run.files.iter().filter(|f| f.error.is_some()) {
        println!(
            "  {:?} {}: {}",
            file.status,
            file.source_file,
            file.error.as_deref().unwrap_or_default()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(dir) = args.input_dir {
        config.input_dir = dir;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(path) = args.registry_path {
        config.registry_path = path;
    }
    if let Some(url) = args.registry_url {
        config.registry_url = Some(url);
    }

    println!("=== ANS Expense Parser ===");
    println!("Input:  {}", config.input_dir.display());
    println!("Output: {}", config.output_dir.display());

    let registry = if args.no_registry {
        info!("registry disabled");
        None
    } else {
        ensure_registry(&config.registry_source()).await
    };
    match &registry {
        Some(r) => println!("Registry: {} operators", r.len()),
        None => println!("Registry: unavailable, running without enrichment"),
    }

    let output = run(&config.input_dir, registry.as_ref())
        .with_context(|| format!("Run over {} failed", config.input_dir.display()))?;

    if args.dry_run {
        println!("\nDry run - no files written");
    } else {
        let written = write_all(&output, &config.input_dir, &config.output_dir)
            .context("Failed to write outputs")?;
        println!("\nWrote:");
        for path in [
            &written.consolidated,
            &written.issues,
            &written.issue_summary,
            &written.aggregated,
            &written.manifest,
        ] {
            println!("  {}", path.display());
        }
    }

    print_summary(&output);
    Ok(())
}
