//! Query and metric definition models, plus the transient result types
//! produced during one execution cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Metric kind. Resolved once at configuration load time; an unrecognized
/// value fails deserialization rather than surfacing at runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Latest observation replaces the prior one.
    Gauge,
    /// Cumulative total; the source query supplies absolute readings.
    Counter,
    /// Distribution of observed values.
    Histogram,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Histogram => write!(f, "histogram"),
        }
    }
}

fn default_value_column() -> String {
    "value".to_string()
}

/// One metric derived from a query's result rows. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct MetricDefinition {
    /// Metric name (process-wide unique).
    #[validate(length(min = 1, message = "Metric name is required"))]
    pub name: String,
    /// Help text shown in the exposition output.
    pub help: String,
    /// Metric kind.
    #[serde(rename = "type")]
    pub kind: MetricKind,
    /// Ordered label column names. Empty means the metric is unlabeled
    /// and every row contributes to the same single series.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Column holding the sample value.
    #[serde(default = "default_value_column")]
    pub value_column: String,
}

/// One scheduled query bound to a single database. Immutable after load;
/// uniquely identified by name within a loaded configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QueryDefinition {
    /// Logical query name.
    #[validate(length(min = 1, message = "Query name is required"))]
    pub name: String,
    /// Name of the database the query runs against.
    #[validate(length(min = 1, message = "Query database is required"))]
    pub database: String,
    /// Opaque SQL text, passed through unmodified.
    #[validate(length(min = 1, message = "Query SQL is required"))]
    pub sql: String,
    /// Execution interval in seconds.
    #[validate(range(min = 1, message = "Interval must be greater than zero"))]
    pub interval: u64,
    /// Execution timeout in seconds.
    #[validate(range(min = 1, message = "Timeout must be greater than zero"))]
    pub timeout: u64,
    /// Metrics materialized from this query's rows.
    #[validate(nested)]
    pub metrics: Vec<MetricDefinition>,
}

/// A single scalar cell of a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl ScalarValue {
    /// True for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Renders the value as label text. NULL renders as an empty string,
    /// matching how missing label values are exposed.
    pub fn as_label_text(&self) -> String {
        match self {
            ScalarValue::Null => String::new(),
            ScalarValue::Bool(b) => b.to_string(),
            ScalarValue::Int(i) => i.to_string(),
            ScalarValue::Float(f) => f.to_string(),
            ScalarValue::Text(s) => s.clone(),
            ScalarValue::Timestamp(ts) => ts.to_rfc3339(),
        }
    }
}

/// Result of one query execution: a column list and positionally aligned
/// rows of tagged scalars. Produced and consumed within one execution
/// cycle, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    /// Column names in result order.
    pub columns: Vec<String>,
    /// Row data; each row has one value per column.
    pub rows: Vec<Vec<ScalarValue>>,
}

impl ExecutionResult {
    /// Creates a result from a column list and rows.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<ScalarValue>>) -> Self {
        Self { columns, rows }
    }

    /// Position of a column by name, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Number of rows returned.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// True when the query returned no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One metric update emitted by the row mapper.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// Metric name.
    pub metric: String,
    /// Label pairs in definition order.
    pub labels: Vec<(String, String)>,
    /// Coerced numeric value.
    pub value: f64,
}
