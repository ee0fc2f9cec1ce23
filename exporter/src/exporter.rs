//! Composition root: wires the configuration into a connector, a metric
//! sink and one scheduled task per query, and exposes the operations the
//! HTTP surface and the command line act on.

use std::sync::Arc;
use std::time::Duration;

use common::config::AppConfig;
use common::errors::{AppError, AppResult};
use common::models::{ConnectivityOutcome, TaskOutcome, TaskSnapshot};

use crate::connector::{DatabaseConnector, SqlxConnector};
use crate::scheduler::Scheduler;
use crate::sink::PrometheusSink;
use crate::task;

/// How long `stop` waits for in-flight executions before abandoning them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct Exporter {
    config: AppConfig,
    connector: Arc<dyn DatabaseConnector>,
    sink: Arc<PrometheusSink>,
    scheduler: Scheduler,
}

impl Exporter {
    /// Builds the exporter from a validated configuration. All metric
    /// families are registered up front so the metrics endpoint exposes
    /// every configured family from the first scrape.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let connector = Arc::new(SqlxConnector::new(config.databases.clone()));
        Self::with_connector(config, connector)
    }

    pub fn with_connector(
        config: AppConfig,
        connector: Arc<dyn DatabaseConnector>,
    ) -> AppResult<Self> {
        let sink = Arc::new(PrometheusSink::new(&config.metric_definitions())?);
        let tasks = task::build_tasks(&config.queries, connector.clone(), sink.clone())?;
        tracing::info!(
            databases = config.databases.len(),
            queries = config.queries.len(),
            "Exporter assembled"
        );
        Ok(Self {
            config,
            connector,
            sink,
            scheduler: Scheduler::new(tasks),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Arms the per-query timers.
    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Disarms the timers and waits for in-flight executions, bounded by
    /// the shutdown grace period.
    pub async fn stop(&self) {
        tracing::info!("Stopping scheduled collection");
        self.scheduler.stop(SHUTDOWN_GRACE).await;
    }

    /// Runs every task once (or just the named one) and reports each
    /// outcome. A task whose previous execution is still in flight is
    /// reported as failed rather than queued behind it.
    pub async fn collect_once(&self, query: Option<&str>) -> AppResult<Vec<TaskOutcome>> {
        let tasks: Vec<_> = match query {
            Some(name) => {
                let task = self
                    .scheduler
                    .task(name)
                    .ok_or_else(|| AppError::QueryNotFound(name.to_string()))?;
                vec![task.clone()]
            }
            None => self.scheduler.tasks().to_vec(),
        };

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            let outcome = match task.run().await {
                Some(outcome) => outcome,
                None => TaskOutcome {
                    query: task.name().to_string(),
                    success: false,
                    rows: 0,
                    samples: 0,
                    mapping_errors: 0,
                    duration_ms: 0,
                    error: Some("previous execution still running".to_string()),
                },
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Pings every configured database. A failing database is reported in
    /// its outcome and never aborts the remaining pings.
    pub async fn test_connectivity(&self) -> Vec<ConnectivityOutcome> {
        let mut names: Vec<&String> = self.config.databases.keys().collect();
        names.sort();

        let mut outcomes = Vec::with_capacity(names.len());
        for name in names {
            let outcome = match self.connector.ping(name).await {
                Ok(latency) => {
                    tracing::info!(database = %name, latency_ms = latency.as_millis() as u64, "Connectivity check passed");
                    ConnectivityOutcome {
                        database: name.clone(),
                        success: true,
                        latency_ms: Some(latency.as_millis() as u64),
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::error!(database = %name, error = %e, "Connectivity check failed");
                    ConnectivityOutcome {
                        database: name.clone(),
                        success: false,
                        latency_ms: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Per-task state for the health surface, in configuration order.
    pub fn health(&self) -> Vec<TaskSnapshot> {
        self.scheduler
            .tasks()
            .iter()
            .map(|task| task.snapshot())
            .collect()
    }

    /// Current registry contents in the Prometheus text format.
    pub fn metrics_text(&self) -> AppResult<String> {
        self.sink.encode()
    }
}
