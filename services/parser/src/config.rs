//! Environment-driven configuration for the parser binary.

use crate::registry::RegistrySource;
use ans_collector::{FetchConfig, DEFAULT_REGISTRY_URL};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub registry_path: PathBuf,
    /// `None` disables fetching; a cached registry is still used.
    pub registry_url: Option<String>,
    pub fetch: FetchConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            input_dir: PathBuf::from(
                std::env::var("INPUT_DIR").unwrap_or_else(|_| "data/extracted".to_string()),
            ),
            output_dir: PathBuf::from(
                std::env::var("OUTPUT_DIR").unwrap_or_else(|_| "data/processed".to_string()),
            ),
            registry_path: PathBuf::from(
                std::env::var("REGISTRY_PATH")
                    .unwrap_or_else(|_| "data/registry/Relatorio_cadop.csv".to_string()),
            ),
            registry_url: match std::env::var("REGISTRY_URL") {
                Ok(url) if url.trim().is_empty() => None,
                Ok(url) => Some(url),
                Err(_) => Some(DEFAULT_REGISTRY_URL.to_string()),
            },
            fetch: FetchConfig::from_env(),
        }
    }

    pub fn registry_source(&self) -> RegistrySource {
        RegistrySource {
            cache_path: self.registry_path.clone(),
            url: self.registry_url.clone(),
            fetch: self.fetch.clone(),
        }
    }
}
