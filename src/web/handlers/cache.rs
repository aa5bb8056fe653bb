//! 缓存管理处理器

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;

use crate::store::CacheAggregate;
use crate::web::auth::Credentials;
use crate::web::error::ApiResult;
use crate::web::types::{AppState, PurgeResponse};

/// GET /api/cache/stats
pub async fn cache_stats(
    State(state): State<Arc<AppState>>,
    Credentials(credentials): Credentials,
) -> ApiResult<Json<CacheAggregate>> {
    Ok(Json(state.gateway.cache_stats(&credentials).await?))
}

/// DELETE /api/cache/clean
pub async fn clean_cache(
    State(state): State<Arc<AppState>>,
    Credentials(credentials): Credentials,
) -> ApiResult<Json<PurgeResponse>> {
    let deleted_entries = state.gateway.purge_cache(&credentials).await?;
    Ok(Json(PurgeResponse {
        message: "过期缓存已清理".to_string(),
        deleted_entries,
    }))
}
