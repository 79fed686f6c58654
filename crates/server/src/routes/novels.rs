// crates/server/src/routes/novels.rs
//! Read-only view of what downloads have stored.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use novel_dl_db::{Resource, UnitEntry};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct NovelResponse {
    #[serde(flatten)]
    pub novel: Resource,
    pub chapters_in_db: i64,
}

#[derive(Debug, Serialize)]
pub struct ChapterListResponse {
    pub novel_id: i64,
    pub chapters: Vec<UnitEntry>,
    pub total: usize,
}

/// GET /api/novels/{id}
async fn get_novel(
    State(state): State<Arc<AppState>>,
    Path(novel_id): Path<i64>,
) -> ApiResult<Json<NovelResponse>> {
    let novel = state
        .db
        .get_resource(novel_id)
        .await?
        .ok_or(ApiError::ResourceNotFound(novel_id))?;
    let chapters_in_db = state.db.unit_count(novel_id).await?;
    Ok(Json(NovelResponse {
        novel,
        chapters_in_db,
    }))
}

/// GET /api/novels/{id}/chapters
async fn list_chapters(
    State(state): State<Arc<AppState>>,
    Path(novel_id): Path<i64>,
) -> ApiResult<Json<ChapterListResponse>> {
    if !state.db.resource_exists(novel_id).await? {
        return Err(ApiError::ResourceNotFound(novel_id));
    }
    let chapters = state.db.unit_entries(novel_id).await?;
    Ok(Json(ChapterListResponse {
        novel_id,
        total: chapters.len(),
        chapters,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/novels/{id}", get(get_novel))
        .route("/novels/{id}/chapters", get(list_chapters))
}
