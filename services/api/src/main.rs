//! API Service - Read-only API over the consolidated ANS expense outputs
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /operators - Paginated registry listing with search
//! - GET /operators/:identifier - One operator by CNPJ
//! - GET /operators/:identifier/expenses - Canonical expenses of one operator
//! - GET /expenses/by-region - Total expense per UF
//! - GET /statistics - Totals, row mean and top operators
//! - GET /aggregates - Aggregated (legal name, UF) buckets
//!
//! Everything is loaded once at start-up into a `DataContext` shared as
//! router state.

use ans_collector::init_logging;
use ans_parser::output::{
    read_aggregated, read_canonical, AggregatedRecord, CanonicalRecord, AGGREGATED_FILE,
    CONSOLIDATED_FILE,
};
use ans_parser::{
    normalize_identifier, summarize, totals_by_region, CanonicalRow, ExpenseSummary, Registry,
    RegistryEntry,
};
use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

const DEFAULT_PAGE_LIMIT: usize = 10;
const MAX_PAGE_LIMIT: usize = 100;
const TOP_OPERATORS: usize = 5;

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
struct Config {
    output_dir: PathBuf,
    registry_path: PathBuf,
    bind: String,
}

impl Config {
    fn from_env() -> Self {
        Self {
            output_dir: PathBuf::from(
                std::env::var("OUTPUT_DIR").unwrap_or_else(|_| "data/processed".to_string()),
            ),
            registry_path: PathBuf::from(
                std::env::var("REGISTRY_PATH")
                    .unwrap_or_else(|_| "data/registry/Relatorio_cadop.csv".to_string()),
            ),
            bind: std::env::var("API_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Read-only data loaded once per process.
struct DataContext {
    registry: Registry,
    /// Canonical rows with the registry region attached.
    expenses: Vec<CanonicalRow>,
    aggregates: Vec<AggregatedRecord>,
}

impl DataContext {
    fn load(config: &Config) -> anyhow::Result<Self> {
        let registry = match Registry::load(&config.registry_path) {
            Ok(registry) => registry,
            Err(e) => {
                warn!(error = %e, "registry unavailable, operator endpoints will be empty");
                Registry::default()
            }
        };

        let canonical_path = config.output_dir.join(CONSOLIDATED_FILE);
        let records = read_canonical(&canonical_path)
            .with_context(|| format!("Failed to load {}", canonical_path.display()))?;

        let aggregated_path = config.output_dir.join(AGGREGATED_FILE);
        let aggregates = read_aggregated(&aggregated_path)
            .with_context(|| format!("Failed to load {}", aggregated_path.display()))?;

        Ok(Self::from_parts(registry, records, aggregates))
    }

    fn from_parts(
        registry: Registry,
        records: Vec<CanonicalRecord>,
        aggregates: Vec<AggregatedRecord>,
    ) -> Self {
        let expenses = records
            .into_iter()
            .map(|record| {
                let mut row = CanonicalRow::from(record);
                if let Some(entry) = registry.find_by_identifier(&row.identifier) {
                    row.region = entry.region.clone();
                }
                row
            })
            .collect();

        Self {
            registry,
            expenses,
            aggregates,
        }
    }

    /// Case-insensitive match on legal or trade name; digit queries also
    /// match the identifier.
    fn search_operators(&self, search: Option<&str>) -> Vec<&RegistryEntry> {
        let needle = search.map(str::trim).filter(|s| !s.is_empty());
        let Some(needle) = needle else {
            return self.registry.entries().iter().collect();
        };

        let lowered = needle.to_lowercase();
        let digits = normalize_identifier(needle);
        self.registry
            .entries()
            .iter()
            .filter(|e| {
                e.legal_name.to_lowercase().contains(&lowered)
                    || e.trade_name.to_lowercase().contains(&lowered)
                    || (!digits.is_empty() && e.identifier.contains(&digits))
            })
            .collect()
    }

    fn operator(&self, identifier: &str) -> Option<&RegistryEntry> {
        self.registry.find_by_identifier(identifier)
    }

    /// Rows of one identifier ordered by (year, quarter).
    fn expenses_for(&self, identifier: &str) -> Vec<&CanonicalRow> {
        let identifier = normalize_identifier(identifier);
        let mut rows: Vec<&CanonicalRow> = self
            .expenses
            .iter()
            .filter(|r| r.identifier == identifier)
            .collect();
        rows.sort_by_key(|r| (r.year, r.quarter));
        rows
    }
}

type AppState = Arc<DataContext>;

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
    operators: usize,
    expenses: usize,
}

#[derive(Debug, Serialize)]
struct Page<T> {
    data: Vec<T>,
    total: usize,
    page: usize,
    limit: usize,
    total_pages: usize,
}

#[derive(Serialize)]
struct ExpenseResponse {
    identifier: String,
    legal_name: String,
    year: Option<i32>,
    quarter: Option<u8>,
    expense_value: Option<f64>,
}

impl From<&CanonicalRow> for ExpenseResponse {
    fn from(row: &CanonicalRow) -> Self {
        Self {
            identifier: row.identifier.clone(),
            legal_name: row.legal_name.clone(),
            year: row.year,
            quarter: row.quarter,
            expense_value: row.expense_value,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct RegionTotal {
    region: String,
    total_expense: f64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// ============================================================================
// Query params
// ============================================================================

#[derive(Deserialize)]
struct OperatorsQuery {
    page: Option<usize>,
    limit: Option<usize>,
    search: Option<String>,
}

#[derive(Deserialize)]
struct AggregatesQuery {
    limit: Option<usize>,
}

// ============================================================================
// Helpers
// ============================================================================

fn paginate<T: Clone>(items: &[T], page: usize, limit: usize) -> Page<T> {
    let total = items.len();
    let start = (page - 1).saturating_mul(limit).min(total);
    let end = start.saturating_add(limit).min(total);
    Page {
        data: items[start..end].to_vec(),
        total,
        page,
        limit,
        total_pages: total.div_ceil(limit),
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
        operators: state.registry.len(),
        expenses: state.expenses.len(),
    })
}

async fn operators_handler(
    State(state): State<AppState>,
    Query(params): Query<OperatorsQuery>,
) -> Response {
    let page = params.page.unwrap_or(1);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if page < 1 {
        return error_response(StatusCode::BAD_REQUEST, "page must be >= 1");
    }
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("limit must be between 1 and {}", MAX_PAGE_LIMIT),
        );
    }

    let matches = state.search_operators(params.search.as_deref());
    Json(paginate(&matches, page, limit)).into_response()
}

async fn operator_handler(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Response {
    match state.operator(&identifier) {
        Some(entry) => Json(entry).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Operator not found"),
    }
}

async fn operator_expenses_handler(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Response {
    let rows: Vec<ExpenseResponse> = state
        .expenses_for(&identifier)
        .into_iter()
        .map(ExpenseResponse::from)
        .collect();
    Json(rows).into_response()
}

async fn by_region_handler(State(state): State<AppState>) -> Json<Vec<RegionTotal>> {
    let mut totals: Vec<RegionTotal> = totals_by_region(&state.expenses)
        .into_iter()
        .map(|(region, total_expense)| RegionTotal {
            region,
            total_expense,
        })
        .collect();
    totals.sort_by(|a, b| b.total_expense.total_cmp(&a.total_expense));
    Json(totals)
}

async fn statistics_handler(State(state): State<AppState>) -> Json<ExpenseSummary> {
    Json(summarize(&state.expenses, TOP_OPERATORS))
}

async fn aggregates_handler(
    State(state): State<AppState>,
    Query(params): Query<AggregatesQuery>,
) -> Json<Vec<AggregatedRecord>> {
    let limit = params.limit.unwrap_or(state.aggregates.len());
    Json(state.aggregates.iter().take(limit).cloned().collect())
}

fn router(state: AppState) -> Router {
    // CORS for web frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/operators", get(operators_handler))
        .route("/operators/:identifier", get(operator_handler))
        .route("/operators/:identifier/expenses", get(operator_expenses_handler))
        .route("/expenses/by-region", get(by_region_handler))
        .route("/statistics", get(statistics_handler))
        .route("/aggregates", get(aggregates_handler))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let config = Config::from_env();

    println!("=== ANS Expenses API ===");
    println!("Loading outputs from {}...", config.output_dir.display());

    let context = DataContext::load(&config)?;
    info!(
        operators = context.registry.len(),
        expenses = context.expenses.len(),
        aggregates = context.aggregates.len(),
        "data loaded"
    );

    let app = router(Arc::new(context));

    println!("API listening on http://{}", config.bind);
    println!("\nEndpoints:");
    println!("  GET /health");
    println!("  GET /operators?page=&limit=&search=");
    println!("  GET /operators/:identifier");
    println!("  GET /operators/:identifier/expenses");
    println!("  GET /expenses/by-region");
    println!("  GET /statistics");
    println!("  GET /aggregates?limit=");

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
