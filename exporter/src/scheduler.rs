//! Fixed-period scheduling of query tasks.
//!
//! Each task gets its own timer armed at construction time and firing
//! every `interval` seconds regardless of how long executions take. A
//! firing spawns the execution instead of awaiting it, so a slow query
//! lets the next tick reach the task's own overlap guard and be dropped
//! there.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::task::QueryTask;

/// Drives the periodic execution of every configured query task.
pub struct Scheduler {
    tasks: Vec<Arc<QueryTask>>,
    shutdown: watch::Sender<bool>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(tasks: Vec<Arc<QueryTask>>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            tasks,
            shutdown,
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn tasks(&self) -> &[Arc<QueryTask>] {
        &self.tasks
    }

    pub fn task(&self, name: &str) -> Option<&Arc<QueryTask>> {
        self.tasks.iter().find(|t| t.name() == name)
    }

    /// Arms one timer per task. The first firing is immediate, later
    /// firings are measured from now, not from execution end.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap();
        for task in &self.tasks {
            let task = task.clone();
            let shutdown = self.shutdown.subscribe();
            tracing::info!(
                query = %task.name(),
                interval_secs = task.interval().as_secs(),
                "Scheduling query"
            );
            handles.push(tokio::spawn(schedule_loop(task, shutdown)));
        }
    }

    /// Stops arming new executions and waits up to `grace` for in-flight
    /// ones to finish. Executions still running after the grace period
    /// are abandoned.
    pub async fn stop(&self, grace: Duration) {
        let _ = self.shutdown.send(true);
        for task in &self.tasks {
            task.stop();
        }

        let settle = async {
            for task in &self.tasks {
                task.settle().await;
            }
        };
        if tokio::time::timeout(grace, settle).await.is_err() {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "Grace period elapsed with executions still in flight"
            );
        }

        for handle in self.handles.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

async fn schedule_loop(task: Arc<QueryTask>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(task.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let task = task.clone();
                tokio::spawn(async move {
                    task.run().await;
                });
            }
            _ = shutdown.changed() => {
                tracing::debug!(query = %task.name(), "Timer disarmed");
                break;
            }
        }
    }
}
