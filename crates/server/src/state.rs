// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use novel_dl_core::{BatchRetriever, UnitFetcher, UnitSource};
use novel_dl_db::Database;

use crate::auth::TokenVerifier;
use crate::config::ServerConfig;
use crate::control::TaskControl;
use crate::jobs::{DownloadWorker, JobDispatcher};
use crate::lifecycle::TaskLifecycle;
use crate::notify::{ConnectionRegistry, NotificationBus};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub db: Database,
    /// Owner-scoped push of task events.
    pub bus: NotificationBus,
    pub control: TaskControl,
    pub auth: TokenVerifier,
    /// How long a push connection may stay unauthenticated.
    pub auth_grace: Duration,
}

impl AppState {
    /// Wire the task core together and start the job workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(db: Database, config: &ServerConfig, source: Arc<dyn UnitSource>) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let bus = NotificationBus::new(registry);
        let lifecycle = TaskLifecycle::new(db.clone(), bus.clone());

        let fetcher = Arc::new(UnitFetcher::new(source, &config.fetch));
        let retriever = Arc::new(BatchRetriever::new(fetcher, config.fetch.max_workers));
        let worker = DownloadWorker::new(lifecycle.clone(), retriever);
        let dispatcher = JobDispatcher::start(
            Arc::new(worker),
            config.job_workers,
            config.queue_capacity,
            config.cancel_grace,
        );

        Arc::new(Self {
            start_time: Instant::now(),
            db,
            bus,
            control: TaskControl::new(lifecycle, dispatcher),
            auth: TokenVerifier::new(&config.jwt_secret),
            auth_grace: config.auth_grace,
        })
    }

    pub fn dispatcher(&self) -> &Arc<JobDispatcher> {
        self.control.dispatcher()
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use novel_dl_core::{ContentEnvelope, SourceError, UnitRef};

    struct NoSource;

    #[async_trait]
    impl UnitSource for NoSource {
        async fn list_units(&self, _resource_id: i64) -> Result<Vec<UnitRef>, SourceError> {
            Ok(Vec::new())
        }

        async fn fetch_unit(&self, _unit_id: &str) -> Result<ContentEnvelope, SourceError> {
            Err(SourceError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let db = Database::new_in_memory().await.expect("in-memory DB");
        let state = AppState::new(db, &ServerConfig::default(), Arc::new(NoSource));
        assert!(state.uptime_secs() < 1);
        assert_eq!(state.bus.registry().connected(), 0);
        assert_eq!(state.dispatcher().in_flight(), 0);
    }
}
