//! Fetch layer shared by the ANS expense services.
//!
//! The parser uses `Fetcher` to obtain the operator registry; the `collector`
//! binary uses it to pre-fetch registry and source archives into the cache.

pub mod fetch;
pub mod logging;

pub use fetch::{
    content_hash, file_name_from_url, FetchConfig, FetchError, FetchOutcome, FetchStatus, Fetcher,
    DEFAULT_REGISTRY_URL,
};
pub use logging::init_logging;
