//! Collector Service - Pre-fetches ANS open-data files into the local cache
//!
//! Responsibilities:
//! - Download the operator registry (default) or any given URLs
//! - Retry transient failures with bounded attempts and linear backoff
//! - Reuse cached files unless --force is given
//! - Record every outcome in DATA_DIR/fetch_manifest.json
//!
//! Usage:
//!   # Operator registry into the parser's registry cache:
//!   cargo run --bin collector
//!
//!   # Specific files:
//!   cargo run --bin collector -- --url https://... --url https://...

use ans_collector::{
    file_name_from_url, init_logging, FetchConfig, FetchOutcome, FetchStatus, Fetcher,
    DEFAULT_REGISTRY_URL,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "collector", about = "Pre-fetches ANS open-data files into the local cache")]
struct Args {
    /// URL to fetch; repeatable. Defaults to REGISTRY_URL.
    #[arg(long)]
    url: Vec<String>,

    /// Destination file (single URL only). Defaults to DATA_DIR/<file name>,
    /// or REGISTRY_PATH for the registry.
    #[arg(long)]
    dest: Option<PathBuf>,

    /// Force re-download even if cached
    #[arg(long, default_value = "false")]
    force: bool,

    /// Print what would be fetched without fetching
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

#[derive(Debug, Clone)]
struct Config {
    data_dir: PathBuf,
    registry_url: String,
    registry_path: PathBuf,
    fetch: FetchConfig,
}

impl Config {
    fn from_env() -> Self {
        Self {
            data_dir: PathBuf::from(
                std::env::var("DATA_DIR").unwrap_or_else(|_| "./data/raw".to_string()),
            ),
            registry_url: std::env::var("REGISTRY_URL")
                .unwrap_or_else(|_| DEFAULT_REGISTRY_URL.to_string()),
            registry_path: PathBuf::from(
                std::env::var("REGISTRY_PATH")
                    .unwrap_or_else(|_| "./data/registry/Relatorio_cadop.csv".to_string()),
            ),
            fetch: FetchConfig::from_env(),
        }
    }

    /// Where a URL lands when no --dest is given.
    fn destination(&self, url: &str) -> Result<PathBuf> {
        if url == self.registry_url {
            return Ok(self.registry_path.clone());
        }
        let name = file_name_from_url(url)
            .with_context(|| format!("cannot derive a file name from {}", url))?;
        Ok(self.data_dir.join(name))
    }
}

#[derive(Debug, Serialize)]
struct FetchManifest {
    generated_at: DateTime<Utc>,
    data_dir: String,
    summary: FetchSummary,
    entries: Vec<FetchOutcome>,
    errors: Vec<FetchFailure>,
}

#[derive(Debug, Default, Serialize)]
struct FetchSummary {
    downloaded: usize,
    cached: usize,
    error: usize,
}

#[derive(Debug, Serialize)]
struct FetchFailure {
    url: String,
    error: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let args = Args::parse();
    let config = Config::from_env();

    println!("=== ANS Collector ===");
    println!("Data dir: {}", config.data_dir.display());

    let urls = if args.url.is_empty() {
        vec![config.registry_url.clone()]
    } else {
        args.url.clone()
    };
    if args.dest.is_some() && urls.len() > 1 {
        anyhow::bail!("--dest can only be used with a single --url");
    }

    let mut targets = Vec::with_capacity(urls.len());
    for url in &urls {
        let dest = match &args.dest {
            Some(dest) => dest.clone(),
            None => config.destination(url)?,
        };
        targets.push((url.clone(), dest));
    }

    if args.dry_run {
        for (url, dest) in &targets {
            println!("  would fetch {} -> {}", url, dest.display());
        }
        return Ok(());
    }

    let fetcher = Fetcher::new(config.fetch.clone()).context("Failed to build HTTP client")?;
    let mut manifest = FetchManifest {
        generated_at: Utc::now(),
        data_dir: config.data_dir.display().to_string(),
        summary: FetchSummary::default(),
        entries: Vec::new(),
        errors: Vec::new(),
    };

    for (url, dest) in &targets {
        match fetcher.fetch_to_cache(url, dest, args.force).await {
            Ok(outcome) => {
                match outcome.status {
                    FetchStatus::Downloaded => manifest.summary.downloaded += 1,
                    FetchStatus::Cached => manifest.summary.cached += 1,
                }
                println!(
                    "  {:?}: {} ({} bytes, {})",
                    outcome.status,
                    outcome.path.display(),
                    outcome.bytes,
                    outcome.content_hash
                );
                manifest.entries.push(outcome);
            }
            Err(e) => {
                error!(url = %url, error = %e, "fetch failed");
                manifest.summary.error += 1;
                manifest.errors.push(FetchFailure {
                    url: url.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .context("Failed to create data dir")?;
    let manifest_path = config.data_dir.join("fetch_manifest.json");
    let json = serde_json::to_string_pretty(&manifest)?;
    tokio::fs::write(&manifest_path, json)
        .await
        .with_context(|| format!("Failed to write {}", manifest_path.display()))?;
    info!(path = %manifest_path.display(), "fetch manifest written");

    println!("\n=== Collection Summary ===");
    println!("Downloaded: {}", manifest.summary.downloaded);
    println!("Cached: {}", manifest.summary.cached);
    println!("Failed: {}", manifest.summary.error);

    if manifest.summary.error > 0 {
        anyhow::bail!("{} fetch(es) failed", manifest.summary.error);
    }
    Ok(())
}
