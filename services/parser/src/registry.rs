//! Operator registry cross-referencing.
//!
//! The regulator publishes a registry of active operators (registry-id,
//! CNPJ, legal name, UF, ...). Quarterly statements often carry only the
//! registry-id, so the registry is how rows get their identifier, legal name
//! and region.
//!
//! The registry is loaded once per process and passed by reference to every
//! consumer. A missing or unreadable registry is never fatal.

use crate::error::RegistryError;
use crate::identifier::{normalize_header, normalize_identifier, normalize_legal_name};
use crate::normalize::CanonicalRow;
use crate::source::read_table;
use ans_collector::{FetchConfig, Fetcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One registered operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub registry_id: String,
    pub identifier: String,
    pub legal_name: String,
    pub trade_name: String,
    pub modality: String,
    pub city: String,
    pub region: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegistryColumn {
    RegistryId,
    Identifier,
    LegalName,
    TradeName,
    Modality,
    City,
    Region,
}

/// Normalized registry header -> column. Exact matches only; the registry
/// layout is fixed, unlike the statements.
const REGISTRY_HEADERS: &[(&str, RegistryColumn)] = &[
    ("registrooperadora", RegistryColumn::RegistryId),
    ("registroans", RegistryColumn::RegistryId),
    ("regans", RegistryColumn::RegistryId),
    ("cnpj", RegistryColumn::Identifier),
    ("razaosocial", RegistryColumn::LegalName),
    ("razaosocialnome", RegistryColumn::LegalName),
    ("nomefantasia", RegistryColumn::TradeName),
    ("modalidade", RegistryColumn::Modality),
    ("cidade", RegistryColumn::City),
    ("uf", RegistryColumn::Region),
];

/// Read-only registry indexed by registry-id and by identifier.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
    by_registry_id: HashMap<String, usize>,
    by_identifier: HashMap<String, usize>,
}

impl Registry {
    /// Build the indexes. On duplicate keys the first entry wins.
    pub fn from_entries(entries: Vec<RegistryEntry>) -> Self {
        let mut by_registry_id = HashMap::new();
        let mut by_identifier = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            if !entry.registry_id.is_empty() {
                by_registry_id.entry(entry.registry_id.clone()).or_insert(idx);
            }
            if !entry.identifier.is_empty() {
                by_identifier.entry(entry.identifier.clone()).or_insert(idx);
            }
        }
        Self {
            entries,
            by_registry_id,
            by_identifier,
        }
    }

    /// Load a registry file (CSV/TXT with sniffed delimiter, or workbook).
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let table = read_table(path)?;

        let columns: Vec<Option<RegistryColumn>> = table
            .headers
            .iter()
            .map(|h| {
                let norm = normalize_header(h);
                REGISTRY_HEADERS
                    .iter()
                    .find(|(key, _)| *key == norm)
                    .map(|(_, col)| *col)
            })
            .collect();

        if !columns.contains(&Some(RegistryColumn::RegistryId)) {
            return Err(RegistryError::MissingKeyColumn {
                path: path.to_path_buf(),
                headers: table.headers.clone(),
            });
        }

        let mut entries = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            let mut entry = RegistryEntry::default();
            for (header, column) in table.headers.iter().zip(&columns) {
                let Some(column) = column else { continue };
                let value = row.get(header).unwrap_or("").trim();
                match column {
                    RegistryColumn::RegistryId => entry.registry_id = normalize_identifier(value),
                    RegistryColumn::Identifier => entry.identifier = normalize_identifier(value),
                    RegistryColumn::LegalName => entry.legal_name = normalize_legal_name(value),
                    RegistryColumn::TradeName => entry.trade_name = value.to_string(),
                    RegistryColumn::Modality => entry.modality = value.to_string(),
                    RegistryColumn::City => entry.city = value.to_string(),
                    RegistryColumn::Region => entry.region = value.to_uppercase(),
                }
            }
            if !entry.registry_id.is_empty() || !entry.identifier.is_empty() {
                entries.push(entry);
            }
        }

        info!(path = %path.display(), entries = entries.len(), "registry loaded");
        Ok(Self::from_entries(entries))
    }

    pub fn lookup(&self, registry_id: &str) -> Option<&RegistryEntry> {
        self.by_registry_id.get(registry_id).map(|&i| &self.entries[i])
    }

    /// Lookup by CNPJ. The query is normalized to digits first, so
    /// formatted input (`12.345.678/0001-95`) matches.
    pub fn find_by_identifier(&self, identifier: &str) -> Option<&RegistryEntry> {
        let digits = normalize_identifier(identifier);
        self.by_identifier.get(&digits).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Backfill empty identifier / legal name from the registry-id lookup,
    /// and attach the region (by registry-id, else by identifier).
    ///
    /// Fields that already hold a value are never overwritten.
    pub fn cross_reference(&self, row: &mut CanonicalRow) {
        let by_id = if row.registry_id.is_empty() {
            None
        } else {
            self.lookup(&row.registry_id)
        };

        if let Some(entry) = by_id {
            if row.identifier.is_empty() {
                row.identifier = entry.identifier.clone();
            }
            if row.legal_name.is_empty() {
                row.legal_name = normalize_legal_name(&entry.legal_name);
            }
        }

        if row.region.is_empty() {
            let entry = by_id.or_else(|| {
                if row.identifier.is_empty() {
                    None
                } else {
                    self.find_by_identifier(&row.identifier)
                }
            });
            if let Some(entry) = entry {
                row.region = entry.region.clone();
            }
        }
    }
}

/// Where the registry lives and how to get it when it is not cached yet.
#[derive(Debug, Clone)]
pub struct RegistrySource {
    pub cache_path: PathBuf,
    pub url: Option<String>,
    pub fetch: FetchConfig,
}

/// Load the cached registry, fetching it once if the cache is empty.
///
/// Every failure degrades to `None` with a warning; the run continues
/// without enrichment.
pub async fn ensure_registry(source: &RegistrySource) -> Option<Registry> {
    match try_ensure_registry(source).await {
        Ok(registry) => Some(registry),
        Err(e) => {
            warn!(error = %e, "registry unavailable, continuing without enrichment");
            None
        }
    }
}

async fn try_ensure_registry(source: &RegistrySource) -> Result<Registry, RegistryError> {
    if !source.cache_path.exists() {
        if let Some(url) = &source.url {
            let fetcher = Fetcher::new(source.fetch.clone())?;
            let outcome = fetcher.fetch_to_cache(url, &source.cache_path, false).await?;
            info!(
                url = %outcome.url,
                bytes = outcome.bytes,
                attempts = outcome.attempts,
                "registry fetched"
            );
        }
    }
    Registry::load(&source.cache_path)
}
