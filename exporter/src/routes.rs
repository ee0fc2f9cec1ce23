//! HTTP surface: the Prometheus scrape endpoint and a health endpoint.

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use common::errors::AppError;
use common::models::TaskSnapshot;

use crate::state::AppState;

const SERVICE_NAME: &str = "sql-exporter";
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health_check))
}

/// Prometheus text exposition of the current registry contents.
///
/// Scrapes never trigger query execution; they read whatever the
/// scheduled collections last wrote.
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state.exporter.metrics_text()?;
    Ok(([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body))
}

/// Health check with per-query collection state.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let tasks = state.exporter.health();
    let status = if tasks.iter().any(|t| t.state.consecutive_failures > 0) {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        tasks,
    })
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall status: `healthy`, or `degraded` when any query is failing.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Current timestamp.
    pub timestamp: DateTime<Utc>,
    /// Per-query collection state.
    pub tasks: Vec<TaskSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use common::config::AppConfig;
    use common::models::{ExecutionResult, ScalarValue};

    use crate::connector::testing::MockConnector;
    use crate::exporter::Exporter;

    const CONFIG: &str = r#"
databases:
  main:
    driver: sqlite
    database: ":memory:"

queries:
  - name: total_users
    database: main
    sql: "SELECT COUNT(*) AS count FROM users"
    interval: 60
    timeout: 5
    metrics:
      - name: app_total_users
        help: "Total users"
        type: gauge
        value_column: count
"#;

    fn state() -> AppState {
        let config = AppConfig::from_yaml(CONFIG).unwrap();
        let connector = Arc::new(MockConnector::returning(
            "main",
            ExecutionResult::new(vec!["count".into()], vec![vec![ScalarValue::Int(42)]]),
        ));
        AppState::new(Arc::new(
            Exporter::with_connector(config, connector).unwrap(),
        ))
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_the_text_format() {
        let state = state();
        state.exporter.collect_once(None).await.unwrap();

        let response = metrics(State(state)).await.unwrap().into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            PROMETHEUS_CONTENT_TYPE
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("# HELP app_total_users Total users"));
        assert!(text.contains("app_total_users 42"));
    }

    #[tokio::test]
    async fn health_reports_per_query_state() {
        let state = state();
        state.exporter.collect_once(None).await.unwrap();

        let Json(health) = health_check(State(state)).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.service, "sql-exporter");
        assert_eq!(health.tasks.len(), 1);
        assert_eq!(health.tasks[0].query, "total_users");
        assert_eq!(health.tasks[0].state.last_success, Some(true));
    }

    #[tokio::test]
    async fn health_turns_degraded_when_a_query_fails() {
        let config = AppConfig::from_yaml(CONFIG).unwrap();
        let connector = Arc::new(MockConnector::failing(
            "main",
            common::errors::AppError::Connection("refused".into()),
        ));
        let state = AppState::new(Arc::new(
            Exporter::with_connector(config, connector).unwrap(),
        ));
        state.exporter.collect_once(None).await.unwrap();

        let Json(health) = health_check(State(state)).await;
        assert_eq!(health.status, "degraded");
    }
}
