//! Shared data models for the exporter.

pub mod database;
pub mod health;
pub mod query;

// Re-export commonly used types
pub use database::{DatabaseDefinition, DbType};
pub use health::{ConnectivityOutcome, TaskOutcome, TaskSnapshot, TaskState};
pub use query::{
    ExecutionResult, MetricDefinition, MetricKind, MetricSample, QueryDefinition, ScalarValue,
};
