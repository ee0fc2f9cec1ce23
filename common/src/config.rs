//! Configuration loading and validation.
//!
//! The config file is YAML. String values may reference environment
//! variables with `${VAR}` or `${VAR:-default}`; expansion happens before
//! deserialization so credentials never need to live in the file itself.
//! All validation errors are fatal at load time.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{AppError, AppResult};
use crate::models::{DatabaseDefinition, MetricDefinition, QueryDefinition};

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings for the exporter process itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterSettings {
    /// Bind address for the metrics endpoint.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port for the metrics endpoint.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log level filter (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ExporterSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

/// Validated in-memory configuration. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Exporter process settings.
    #[serde(default)]
    pub exporter: ExporterSettings,
    /// Configured databases, keyed by logical name.
    #[serde(default)]
    pub databases: HashMap<String, DatabaseDefinition>,
    /// Scheduled queries.
    #[serde(default)]
    pub queries: Vec<QueryDefinition>,
}

impl AppConfig {
    /// Loads and validates the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parses configuration from YAML text (used directly in tests).
    pub fn from_yaml(raw: &str) -> AppResult<Self> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(raw)?;
        expand_env_in_value(&mut value);

        let mut config: AppConfig = serde_yaml::from_value(value)
            .map_err(|e| AppError::Configuration(e.to_string()))?;

        // Map keys are the logical database names
        for (name, db) in config.databases.iter_mut() {
            db.name = name.clone();
        }

        config.apply_env_overrides();
        config.validate_all()?;
        Ok(config)
    }

    /// `EXPORTER_HOST`, `EXPORTER_PORT` and `LOG_LEVEL` take precedence
    /// over the `exporter` section.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("EXPORTER_HOST") {
            tracing::debug!(host = %host, "EXPORTER_HOST override");
            self.exporter.host = host;
        }
        if let Some(port) = std::env::var("EXPORTER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.exporter.port = port;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.exporter.log_level = level;
        }
    }

    fn validate_all(&self) -> AppResult<()> {
        for query in &self.queries {
            query
                .validate()
                .map_err(|e| AppError::Configuration(format!("query '{}': {}", query.name, e)))?;
        }

        // Query names must be unique
        let mut seen = std::collections::HashSet::new();
        for query in &self.queries {
            if !seen.insert(query.name.as_str()) {
                return Err(AppError::Configuration(format!(
                    "duplicate query name '{}'",
                    query.name
                )));
            }
            if !self.databases.contains_key(&query.database) {
                return Err(AppError::Configuration(format!(
                    "query '{}' references undefined database '{}'",
                    query.name, query.database
                )));
            }
        }

        // A metric name may appear in several queries, but only with an
        // identical kind, help text and label set.
        let mut metrics: HashMap<&str, &MetricDefinition> = HashMap::new();
        for query in &self.queries {
            for def in &query.metrics {
                match metrics.get(def.name.as_str()) {
                    None => {
                        metrics.insert(&def.name, def);
                    }
                    Some(existing)
                        if existing.kind == def.kind
                            && existing.help == def.help
                            && existing.labels == def.labels => {}
                    Some(existing) => {
                        return Err(AppError::Configuration(format!(
                            "metric '{}' redefined with conflicting kind/help/labels \
                             (was {}, now {})",
                            def.name, existing.kind, def.kind
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// All distinct metric definitions across every query, in declaration
    /// order. Repeated identical definitions are collapsed.
    pub fn metric_definitions(&self) -> Vec<&MetricDefinition> {
        let mut seen = std::collections::HashSet::new();
        let mut defs = Vec::new();
        for query in &self.queries {
            for def in &query.metrics {
                if seen.insert(def.name.as_str()) {
                    defs.push(def);
                }
            }
        }
        defs
    }
}

/// Recursively expands `${VAR}` / `${VAR:-default}` in every string node.
fn expand_env_in_value(value: &mut serde_yaml::Value) {
    match value {
        serde_yaml::Value::String(s) => *s = expand_env(s),
        serde_yaml::Value::Sequence(seq) => seq.iter_mut().for_each(expand_env_in_value),
        serde_yaml::Value::Mapping(map) => map.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

/// Expands `${VAR}` and `${VAR:-default}` references in a string.
/// An unset variable without a default leaves the reference untouched.
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let expr = &after[..end];
                let replacement = match expr.split_once(":-") {
                    Some((var, default)) => {
                        std::env::var(var).unwrap_or_else(|_| default.to_string())
                    }
                    None => match std::env::var(expr) {
                        Ok(v) => v,
                        // Keep the literal reference when unset
                        Err(_) => format!("${{{}}}", expr),
                    },
                };
                out.push_str(&replacement);
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
