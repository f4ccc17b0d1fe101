use crate::app::AppState;
use crate::auth::session::SessionUser;
use crate::cache::KeyStatus;
use crate::error::AppResult;
use axum::extract::State;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct CacheStatus {
    pub cache_size: usize,
    pub entries: Vec<KeyStatus>,
}

/// POST /v1/cache/clear
pub async fn clear_cache(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> AppResult<Json<serde_json::Value>> {
    user.ensure_supervisor()?;
    state.cache.clear();
    tracing::info!(user_id = user.user_id, "analytics cache cleared");
    Ok(Json(serde_json::json!({ "status": "cleared" })))
}

/// GET /v1/cache/status
pub async fn cache_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> AppResult<Json<CacheStatus>> {
    user.ensure_supervisor()?;
    let entries = state.cache.status();
    Ok(Json(CacheStatus {
        cache_size: entries.len(),
        entries,
    }))
}
