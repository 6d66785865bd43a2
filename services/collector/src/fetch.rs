//! Cached remote fetch.
//!
//! Responsibilities:
//! - Download a URL once into a local cache path
//! - Retry transient failures (timeouts, connect errors, 5xx) with linear backoff
//! - Never retry client errors (4xx)
//! - Write atomically (`.part` then rename) and hash the content

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub const DEFAULT_USER_AGENT: &str = "ans-downloader/1.0";

/// Active health-plan operators registry published by ANS.
pub const DEFAULT_REGISTRY_URL: &str =
    "https://dadosabertos.ans.gov.br/FTP/PDA/operadoras_de_plano_de_saude_ativas/Relatorio_cadop.csv";

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Total attempts, including the first one.
    pub retries: u32,
    /// Delay unit; attempt `n` waits `backoff_ms * n` before the next try.
    pub backoff_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_ms: 1000,
            timeout_secs: 60,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retries: env_or("FETCH_RETRIES", defaults.retries),
            backoff_ms: env_or("FETCH_BACKOFF_MS", defaults.backoff_ms),
            timeout_secs: env_or("FETCH_TIMEOUT_SECS", defaults.timeout_secs),
            user_agent: std::env::var("FETCH_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("fetching {url} failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Cached,
    Downloaded,
}

/// Result of one `fetch_to_cache` call.
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub url: String,
    pub path: PathBuf,
    pub status: FetchStatus,
    pub bytes: u64,
    pub content_hash: String,
    /// Zero when the cache was used.
    pub attempts: u32,
    pub captured_at: DateTime<Utc>,
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Last non-empty path segment of a URL, without query or fragment.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next()?;
    let after_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);
    let (_, path) = after_scheme.split_once('/')?;
    path.rsplit('/')
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn io_error(path: &Path, source: std::io::Error) -> FetchError {
    FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Ensure `dest` holds the content of `url`.
    ///
    /// An existing file is used untouched unless `force` is set.
    pub async fn fetch_to_cache(
        &self,
        url: &str,
        dest: &Path,
        force: bool,
    ) -> Result<FetchOutcome, FetchError> {
        if !force && fs::try_exists(dest).await.unwrap_or(false) {
            let bytes = fs::read(dest).await.map_err(|e| io_error(dest, e))?;
            debug!(path = %dest.display(), "using cached file");
            return Ok(FetchOutcome {
                url: url.to_string(),
                path: dest.to_path_buf(),
                status: FetchStatus::Cached,
                bytes: bytes.len() as u64,
                content_hash: content_hash(&bytes),
                attempts: 0,
                captured_at: Utc::now(),
            });
        }

        let (bytes, attempts) = self.download(url).await?;
        let hash = content_hash(&bytes);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        let mut part = dest.as_os_str().to_owned();
        part.push(".part");
        let part = PathBuf::from(part);
        fs::write(&part, &bytes).await.map_err(|e| io_error(&part, e))?;
        fs::rename(&part, dest).await.map_err(|e| io_error(dest, e))?;

        info!(
            url,
            path = %dest.display(),
            bytes = bytes.len(),
            attempts,
            hash = %hash,
            "downloaded"
        );

        Ok(FetchOutcome {
            url: url.to_string(),
            path: dest.to_path_buf(),
            status: FetchStatus::Downloaded,
            bytes: bytes.len() as u64,
            content_hash: hash,
            attempts,
            captured_at: Utc::now(),
        })
    }

    async fn download(&self, url: &str) -> Result<(Vec<u8>, u32), FetchError> {
        let max_attempts = self.config.retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        match resp.bytes().await {
                            Ok(body) => return Ok((body.to_vec(), attempt)),
                            Err(e) => last_error = e.to_string(),
                        }
                    } else if status.is_client_error() {
                        return Err(FetchError::Status {
                            url: url.to_string(),
                            status: status.as_u16(),
                        });
                    } else {
                        last_error = format!("HTTP {}", status.as_u16());
                    }
                }
                Err(e) => last_error = e.to_string(),
            }

            if attempt < max_attempts {
                let delay = Duration::from_millis(self.config.backoff_ms * u64::from(attempt));
                warn!(url, attempt, error = %last_error, delay_ms = delay.as_millis() as u64, "fetch failed, retrying");
                sleep(delay).await;
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts: max_attempts,
            last_error,
        })
    }
}
