// crates/server/src/routes/health.rs
//! Liveness plus a snapshot of the job queue and push connections.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::jobs::JobDispatcher;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct JobStats {
    /// Executions admitted to the dispatcher and not yet finished.
    pub in_flight: usize,
    /// Jobs waiting for a free worker.
    pub queued: usize,
    pub accepting: bool,
}

impl JobStats {
    fn snapshot(dispatcher: &JobDispatcher) -> Self {
        Self {
            in_flight: dispatcher.in_flight(),
            queued: dispatcher.queued(),
            accepting: !dispatcher.is_closed(),
        }
    }
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// "ok", or "draining" once the dispatcher stops taking jobs.
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub jobs: JobStats,
    /// Open push connections, authenticated or not.
    pub connected_clients: usize,
}

/// GET /api/health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let jobs = JobStats::snapshot(state.dispatcher());
    let status = if jobs.accepting { "ok" } else { "draining" };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        jobs,
        connected_clients: state.bus.registry().connected(),
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use novel_dl_core::{ContentEnvelope, SourceError, UnitRef, UnitSource};
    use novel_dl_db::Database;

    use crate::config::ServerConfig;

    struct SlowSource;

    #[async_trait::async_trait]
    impl UnitSource for SlowSource {
        async fn list_units(&self, _resource_id: i64) -> Result<Vec<UnitRef>, SourceError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        async fn fetch_unit(&self, _unit_id: &str) -> Result<ContentEnvelope, SourceError> {
            Ok(ContentEnvelope::ok(""))
        }
    }

    async fn state() -> Arc<AppState> {
        let db = Database::new_in_memory().await.unwrap();
        let config = ServerConfig {
            job_workers: 1,
            ..ServerConfig::default()
        };
        AppState::new(db, &config, Arc::new(SlowSource))
    }

    #[tokio::test]
    async fn test_health_reports_queue_state() {
        let state = state().await;
        let Json(idle) = health_check(State(Arc::clone(&state))).await;
        assert_eq!(idle.status, "ok");
        assert_eq!((idle.jobs.in_flight, idle.jobs.queued), (0, 0));

        state.control.admit(1, 1, None).await.unwrap();
        state.control.admit(1, 2, None).await.unwrap();
        // One job holds the only worker, the other waits in the queue.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let Json(busy) = health_check(State(Arc::clone(&state))).await;
        assert_eq!(busy.jobs.in_flight, 2);
        assert_eq!(busy.jobs.queued, 1);
        assert!(busy.jobs.accepting);

        state.dispatcher().close();
        let Json(closed) = health_check(State(state)).await;
        assert_eq!(closed.status, "draining");
        assert!(!closed.jobs.accepting);
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            uptime_secs: 42,
            jobs: JobStats {
                in_flight: 2,
                queued: 1,
                accepting: true,
            },
            connected_clients: 3,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"uptime_secs\":42"));
        assert!(json.contains("\"jobs\":{\"in_flight\":2,\"queued\":1,\"accepting\":true}"));
        assert!(json.contains("\"connected_clients\":3"));
    }
}
