//! Back-office console list pipeline: fetch a collection, filter, sort,
//! window it for infinite scroll, and apply optimistic mutations, with
//! exports and local settings on the side.

pub mod client;
pub mod console;
pub mod credentials;
pub mod db;
pub mod entities;
pub mod errors;
pub mod export;
pub mod filter;
pub mod list_view;
pub mod models;
pub mod mutation;
pub mod pagination;
pub mod redaction;
pub mod sorting;

pub use crate::client::{ApiClient, ConsoleApi};
pub use crate::console::ConsoleCore;
pub use crate::credentials::{CredentialProvider, KeyringCredentialProvider, StaticCredentials, KEYRING_SERVICE};
pub use crate::entities::{EntityKind, EntitySpec};
pub use crate::errors::{AppError, AppResult};
pub use crate::list_view::ListView;
pub use crate::models::{ConsoleSettings, ExportFormat, ListSnapshot, LoadState, Record, SortConfig, SortDirection};
pub use crate::pagination::{ScrollMetrics, SentinelVisibility};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// JSON logs under `<app_data_dir>/logs/console.log`, rotated daily.
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing(app_data_dir: &Path) -> AppResult<()> {
    let log_dir = app_data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "console.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
