//! Error types for the insight engine

use thiserror::Error;
use uuid::Uuid;

/// Errors that can surface from engine operations.
///
/// Insufficient data is deliberately absent: metrics or factor pairs with
/// fewer than the configured minimum number of samples are skipped, not
/// reported as errors.
#[derive(Debug, Error)]
pub enum InsightError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to fetch log data: {0}")]
    DataFetch(String),

    #[error("Store operation failed: {0}")]
    Store(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("A correlation run is already in progress for child {0}")]
    RunInProgress(Uuid),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
