//! API route handlers for the novel-dl server.

pub mod health;
pub mod novels;
pub mod tasks;
pub mod ws;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router: the JSON API under /api plus the push socket.
///
/// Routes:
/// - GET /api/health - Health check
/// - POST /api/novels - Admit a download task and queue it
/// - GET /api/novels/{id} - Catalog entry with its stored chapter count
/// - GET /api/novels/{id}/chapters - Stored chapters, without content
/// - GET /api/tasks/list - List tasks of an owner, newest first
/// - POST /api/tasks/{id}/terminate - Stop a task
/// - DELETE /api/tasks/{id} - Delete a task
/// - POST /api/tasks/{id}/redownload - Run a finished task again
/// - GET /api/tasks/status/{handle} - Worker pool view of an execution
/// - GET /ws - WebSocket push channel
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", novels::router())
        .nest("/api", tasks::router())
        .merge(ws::router())
        .with_state(state)
}
