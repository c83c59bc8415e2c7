use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::connection::DatabaseManager;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub database: DatabaseHealth,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub status: String,
    pub connection_pool_size: u32,
    pub response_time_ms: u64,
}

#[derive(Clone)]
struct HealthState {
    db: Arc<DatabaseManager>,
    start_time: DateTime<Utc>,
}

/// Health endpoints served next to the webhook: `/health` for a full report,
/// `/health/ready` and `/health/live` for probes.
pub fn router(db: Arc<DatabaseManager>) -> Router {
    let state = HealthState {
        db,
        start_time: Utc::now(),
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
        .route("/health/live", get(liveness_check))
        .with_state(state)
}

async fn health_check(
    State(state): State<HealthState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let started = std::time::Instant::now();
    let db_healthy = ping_database(&state.db).await.is_ok();
    let response_time_ms = started.elapsed().as_millis() as u64;

    let status = if db_healthy { "healthy" } else { "unhealthy" };
    let uptime = Utc::now()
        .signed_duration_since(state.start_time)
        .num_seconds()
        .max(0) as u64;

    let report = HealthResponse {
        status: status.to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: DatabaseHealth {
            status: status.to_string(),
            connection_pool_size: state.db.pool.size(),
            response_time_ms,
        },
        uptime_seconds: uptime,
    };

    if db_healthy {
        Ok(Json(report))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

async fn readiness_check(
    State(state): State<HealthState>,
) -> Result<Json<&'static str>, StatusCode> {
    match ping_database(&state.db).await {
        Ok(()) => Ok(Json("ready")),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

async fn liveness_check() -> Json<&'static str> {
    Json("alive")
}

async fn ping_database(db: &DatabaseManager) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").fetch_one(&db.pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;
    use tempfile::TempDir;

    async fn test_router() -> (Router, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test.db");
        let db_url = format!("sqlite://{}", db_path.display());

        let db = Arc::new(
            DatabaseManager::new(&db_url)
                .await
                .expect("Failed to create test database"),
        );
        db.run_migrations().await.expect("Failed to run migrations");

        (router(db), temp_dir)
    }

    #[tokio::test]
    async fn health_reports_database_status() {
        let (router, _temp_dir) = test_router().await;
        let server = TestServer::new(router).expect("Failed to create test server");

        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let report: HealthResponse = response.json();
        assert_eq!(report.status, "healthy");
        assert_eq!(report.database.status, "healthy");
        assert_eq!(report.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn readiness_follows_database() {
        let (router, _temp_dir) = test_router().await;
        let server = TestServer::new(router).expect("Failed to create test server");

        let response = server.get("/health/ready").await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn liveness_always_responds() {
        let (router, _temp_dir) = test_router().await;
        let server = TestServer::new(router).expect("Failed to create test server");

        let response = server.get("/health/live").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: String = response.json();
        assert_eq!(body, "alive");
    }
}
