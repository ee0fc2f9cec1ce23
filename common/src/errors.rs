//! Error types shared across the exporter.
//!
//! Configuration errors are fatal at load time; all other kinds are
//! contained at the query-task boundary and never take the process down.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result alias used throughout the workspace.
pub type AppResult<T> = Result<T, AppError>;

/// Top-level application error.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid configuration. Fatal: the process does not start.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A database could not be reached or refused the connection.
    #[error("database connection failed: {0}")]
    Connection(String),

    /// A query failed during execution.
    #[error("query execution failed: {0}")]
    Execution(String),

    /// A query exceeded its configured timeout. Kept distinct from
    /// [`AppError::Execution`] so callers can tell the two apart.
    #[error("query timed out after {0}s")]
    QueryTimeout(u64),

    /// A row could not be mapped to a metric sample.
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// Requested query name does not exist in the loaded configuration.
    #[error("query '{0}' not found")]
    QueryNotFound(String),

    /// The metric registry rejected an operation.
    #[error("metric registry error: {0}")]
    MetricRegistry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AppError {
    /// True when the error is a per-execution timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AppError::QueryTimeout(_))
    }
}

/// Per-row, per-metric mapping failure. Skips the offending row only;
/// the remaining rows and metric definitions are still processed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    /// A label or value column is absent from the result set.
    #[error("metric '{metric}': column '{column}' missing from query result")]
    MissingColumn { metric: String, column: String },

    /// The value column holds something that cannot be coerced to a number.
    #[error("metric '{metric}': column '{column}' value '{value}' is not numeric")]
    NonNumericValue {
        metric: String,
        column: String,
        value: String,
    },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::QueryNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Configuration(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
