//! Query task: one schedulable unit binding a query definition to its
//! database and metric definitions.
//!
//! Executions of the same task never overlap. A tick (or on-demand
//! collection) that arrives while a previous execution is still running
//! is dropped and counted, never queued. Failures are contained here:
//! they update the task's own state and leave every other task and the
//! metrics endpoint untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use common::errors::AppResult;
use common::models::{QueryDefinition, TaskOutcome, TaskSnapshot, TaskState};

use crate::connector::DatabaseConnector;
use crate::mapper;
use crate::sink::MetricSink;

/// One scheduled query with its own execution state.
pub struct QueryTask {
    definition: QueryDefinition,
    connector: Arc<dyn DatabaseConnector>,
    sink: Arc<dyn MetricSink>,
    // Overlap guard: held for the whole of one execution
    run_lock: Mutex<()>,
    state: std::sync::Mutex<TaskState>,
    stopped: AtomicBool,
}

impl QueryTask {
    pub fn new(
        definition: QueryDefinition,
        connector: Arc<dyn DatabaseConnector>,
        sink: Arc<dyn MetricSink>,
    ) -> Self {
        Self {
            definition,
            connector,
            sink,
            run_lock: Mutex::new(()),
            state: std::sync::Mutex::new(TaskState::default()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Query name.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Scheduling interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.definition.interval)
    }

    /// Point-in-time state for the health surface.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            query: self.definition.name.clone(),
            state: self.state.lock().unwrap().clone(),
        }
    }

    /// Marks the task stopped. No further executions start; an in-flight
    /// execution is allowed to finish.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Waits until no execution is in flight.
    pub async fn settle(&self) {
        let _guard = self.run_lock.lock().await;
    }

    /// Runs one execution cycle, shared by the timer and on-demand paths.
    ///
    /// Returns `None` when the tick was dropped: either a previous
    /// execution still holds the overlap guard, or the task is stopped.
    pub async fn run(&self) -> Option<TaskOutcome> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }

        let _guard = match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let skipped = {
                    let mut state = self.state.lock().unwrap();
                    state.skipped_overlaps += 1;
                    state.skipped_overlaps
                };
                tracing::warn!(
                    query = %self.definition.name,
                    skipped,
                    "Previous execution still running, tick dropped"
                );
                return None;
            }
        };

        Some(self.execute_cycle().await)
    }

    async fn execute_cycle(&self) -> TaskOutcome {
        let started = std::time::Instant::now();
        {
            let mut state = self.state.lock().unwrap();
            state.last_run = Some(Utc::now());
            state.total_runs += 1;
        }

        let result = self
            .connector
            .execute(
                &self.definition.database,
                &self.definition.sql,
                Duration::from_secs(self.definition.timeout),
            )
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(result) => {
                if result.is_empty() {
                    tracing::debug!(query = %self.definition.name, "Query returned no rows");
                }

                let outcome = mapper::map_result(&self.definition.metrics, &result);
                for error in &outcome.errors {
                    tracing::warn!(query = %self.definition.name, error = %error, "Row skipped");
                }

                let mut applied = 0;
                for sample in &outcome.samples {
                    match self.sink.apply(sample) {
                        Ok(()) => applied += 1,
                        Err(e) => {
                            tracing::warn!(
                                query = %self.definition.name,
                                metric = %sample.metric,
                                error = %e,
                                "Sample rejected by metric sink"
                            );
                        }
                    }
                }

                {
                    let mut state = self.state.lock().unwrap();
                    state.last_success = Some(true);
                    state.last_error = None;
                    state.consecutive_failures = 0;
                }
                tracing::debug!(
                    query = %self.definition.name,
                    rows = result.row_count(),
                    samples = applied,
                    duration_ms,
                    "Collection succeeded"
                );

                TaskOutcome {
                    query: self.definition.name.clone(),
                    success: true,
                    rows: result.row_count(),
                    samples: applied,
                    mapping_errors: outcome.errors.len(),
                    duration_ms,
                    error: None,
                }
            }
            Err(e) => {
                let consecutive = {
                    let mut state = self.state.lock().unwrap();
                    state.last_success = Some(false);
                    state.last_error = Some(e.to_string());
                    state.consecutive_failures += 1;
                    state.total_failures += 1;
                    state.consecutive_failures
                };
                tracing::error!(
                    query = %self.definition.name,
                    error = %e,
                    consecutive_failures = consecutive,
                    "Collection failed"
                );

                TaskOutcome {
                    query: self.definition.name.clone(),
                    success: false,
                    rows: 0,
                    samples: 0,
                    mapping_errors: 0,
                    duration_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// Builds one task per query definition.
pub fn build_tasks(
    queries: &[QueryDefinition],
    connector: Arc<dyn DatabaseConnector>,
    sink: Arc<dyn MetricSink>,
) -> AppResult<Vec<Arc<QueryTask>>> {
    Ok(queries
        .iter()
        .map(|definition| {
            Arc::new(QueryTask::new(
                definition.clone(),
                connector.clone(),
                sink.clone(),
            ))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    use common::errors::AppError;
    use common::models::{ExecutionResult, MetricDefinition, MetricKind, ScalarValue};

    use crate::connector::testing::MockConnector;
    use crate::sink::testing::RecordingSink;

    fn definition(metrics: Vec<MetricDefinition>) -> QueryDefinition {
        QueryDefinition {
            name: "total_users".into(),
            database: "main".into(),
            sql: "SELECT COUNT(*) AS count FROM users".into(),
            interval: 60,
            timeout: 5,
            metrics,
        }
    }

    fn count_gauge() -> MetricDefinition {
        MetricDefinition {
            name: "app_total_users".into(),
            help: "Total users".into(),
            kind: MetricKind::Gauge,
            labels: vec![],
            value_column: "count".into(),
        }
    }

    fn count_result(value: i64) -> ExecutionResult {
        ExecutionResult::new(vec!["count".into()], vec![vec![ScalarValue::Int(value)]])
    }

    fn recording_sink() -> Arc<RecordingSink> {
        Arc::new(RecordingSink::with_kinds(&[(
            "app_total_users",
            MetricKind::Gauge,
        )]))
    }

    /// Returns scripted results in order, then repeats the last one.
    struct SequenceConnector {
        script: std::sync::Mutex<VecDeque<AppResult<ExecutionResult>>>,
    }

    impl SequenceConnector {
        fn new(script: Vec<AppResult<ExecutionResult>>) -> Self {
            Self {
                script: std::sync::Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl DatabaseConnector for SequenceConnector {
        async fn execute(
            &self,
            _database: &str,
            _sql: &str,
            _timeout: Duration,
        ) -> AppResult<ExecutionResult> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ExecutionResult::default()))
        }

        async fn ping(&self, _database: &str) -> AppResult<Duration> {
            Ok(Duration::from_millis(1))
        }
    }

    #[tokio::test]
    async fn successful_run_applies_samples_and_resets_failures() {
        let connector = Arc::new(MockConnector::returning("main", count_result(42)));
        let sink = recording_sink();
        let task = QueryTask::new(definition(vec![count_gauge()]), connector, sink.clone());

        let outcome = task.run().await.expect("not skipped");
        assert!(outcome.success);
        assert_eq!(outcome.rows, 1);
        assert_eq!(outcome.samples, 1);
        assert_eq!(outcome.mapping_errors, 0);

        let applied = sink.applied_samples();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].metric, "app_total_users");
        assert_eq!(applied[0].value, 42.0);
        assert!(applied[0].labels.is_empty());

        let snapshot = task.snapshot();
        assert_eq!(snapshot.state.last_success, Some(true));
        assert_eq!(snapshot.state.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn overlapping_executions_are_dropped_and_counted() {
        let connector = Arc::new(
            MockConnector::returning("main", count_result(1))
                .with_delay(Duration::from_millis(100)),
        );
        let task = Arc::new(QueryTask::new(
            definition(vec![count_gauge()]),
            connector,
            recording_sink(),
        ));

        let first = tokio::spawn({
            let task = task.clone();
            async move { task.run().await }
        });
        // Let the first run take the guard
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = task.run().await;

        assert!(second.is_none());
        assert!(first.await.unwrap().is_some());
        assert_eq!(task.snapshot().state.skipped_overlaps, 1);
        assert_eq!(task.snapshot().state.total_runs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_marks_the_task_failed() {
        let connector = Arc::new(
            MockConnector::returning("main", count_result(1))
                .with_delay(Duration::from_secs(10)),
        );
        let mut def = definition(vec![count_gauge()]);
        def.timeout = 1;
        let task = QueryTask::new(def, connector, recording_sink());

        let outcome = task.run().await.expect("not skipped");
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(task.snapshot().state.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn failure_then_success_resets_the_consecutive_counter() {
        let connector = Arc::new(SequenceConnector::new(vec![
            Err(AppError::Execution("relation does not exist".into())),
            Err(AppError::Execution("relation does not exist".into())),
            Ok(count_result(42)),
        ]));
        let task = QueryTask::new(definition(vec![count_gauge()]), connector, recording_sink());

        assert!(!task.run().await.unwrap().success);
        assert!(!task.run().await.unwrap().success);
        assert_eq!(task.snapshot().state.consecutive_failures, 2);
        assert_eq!(task.snapshot().state.total_failures, 2);

        assert!(task.run().await.unwrap().success);
        let state = task.snapshot().state;
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.total_failures, 2);
        assert_eq!(state.last_error, None);
    }

    #[tokio::test]
    async fn mapping_errors_do_not_fail_the_execution() {
        let result = ExecutionResult::new(
            vec!["count".into()],
            vec![
                vec![ScalarValue::Int(1)],
                vec![ScalarValue::Text("garbage".into())],
            ],
        );
        let connector = Arc::new(MockConnector::returning("main", result));
        let sink = recording_sink();
        let task = QueryTask::new(definition(vec![count_gauge()]), connector, sink.clone());

        let outcome = task.run().await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.samples, 1);
        assert_eq!(outcome.mapping_errors, 1);
        assert_eq!(task.snapshot().state.last_success, Some(true));
    }

    #[tokio::test]
    async fn stopped_task_refuses_to_run() {
        let connector = Arc::new(MockConnector::returning("main", count_result(1)));
        let task = QueryTask::new(definition(vec![count_gauge()]), connector, recording_sink());

        task.stop();
        assert!(task.run().await.is_none());
        assert_eq!(task.snapshot().state.total_runs, 0);
    }
}
