//! Task health and outcome models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-task execution state. Mutated only by the owning query task;
/// snapshotted by the exporter for health reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskState {
    /// Timestamp of the last execution attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    /// Whether the last execution succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<bool>,
    /// Error message from the last failed execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Consecutive failed executions. Reset on success.
    pub consecutive_failures: u64,
    /// Ticks dropped because a previous execution was still running.
    pub skipped_overlaps: u64,
    /// Total execution attempts.
    pub total_runs: u64,
    /// Total failed executions.
    pub total_failures: u64,
}

/// Point-in-time view of one task for the health surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Query name.
    pub query: String,
    #[serde(flatten)]
    pub state: TaskState,
}

/// Outcome of a single on-demand or scheduled execution cycle.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    /// Query name.
    pub query: String,
    /// Whether the execution succeeded end to end.
    pub success: bool,
    /// Rows returned by the query.
    pub rows: usize,
    /// Samples applied to the metric sink.
    pub samples: usize,
    /// Rows skipped due to mapping errors.
    pub mapping_errors: usize,
    /// Wall-clock execution time in milliseconds.
    pub duration_ms: u64,
    /// Error detail (if the execution failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one database reachability check.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityOutcome {
    /// Database name.
    pub database: String,
    /// Whether the database answered the probe.
    pub success: bool,
    /// Probe latency in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Error detail (if the probe failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
