//! ANS claims-expense consolidation.
//!
//! Turns heterogeneous quarterly accounting statements into one canonical
//! expense table, an issue ledger and per-operator aggregates. The stages,
//! in run order:
//!
//! `source` (read) -> `columns` (map) -> `normalize` (filter, parse, tag,
//! backfill via `registry`) -> `consolidate` (collisions, identifier check,
//! ledger) -> `aggregate` -> `output`.
//!
//! `pipeline::run` wires them together.

pub mod aggregate;
pub mod cnpj;
pub mod columns;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod identifier;
pub mod issue;
pub mod normalize;
pub mod number;
pub mod output;
pub mod period;
pub mod pipeline;
pub mod registry;
pub mod source;

pub use aggregate::{aggregate, summarize, totals_by_region, AggregatedBucket, ExpenseSummary};
pub use cnpj::is_valid_cnpj;
pub use columns::{map_columns, ColumnMapping, SemanticField};
pub use config::Config;
pub use consolidate::{Consolidated, Consolidator, IssueLedger};
pub use error::{PipelineError, RegistryError, SourceError};
pub use identifier::{normalize_identifier, normalize_legal_name};
pub use issue::Issue;
pub use normalize::{CanonicalRow, RawRow, RowNormalizer};
pub use number::{format_amount, parse_number};
pub use period::{resolve_period, ResolvedPeriod};
pub use pipeline::{run, FileReport, FileStatus, RunOutput, StageCounts};
pub use registry::{ensure_registry, Registry, RegistryEntry, RegistrySource};
