//! Web 路由定义

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::web::handlers::*;
use crate::web::types::AppState;

/// 创建路由结构
pub fn create_routes() -> Router<Arc<AppState>> {
    Router::new()
        // 服务信息
        .route("/", get(index))
        .route("/health", get(health))
        // 翻译
        .route("/api/translate", post(translate))
        .route("/api/detect", post(detect))
        .route("/api/languages", get(languages))
        .route("/api/files/translate", post(translate_file))
        // 缓存管理
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache/clean", delete(clean_cache))
        // 密钥管理
        .route("/api/keys", post(create_key).get(list_keys))
        .route("/api/keys/validate/current", get(validate_current))
        .route(
            "/api/keys/:id",
            get(get_key).patch(update_key).delete(delete_key),
        )
        .route("/api/keys/:id/revoke", post(revoke_key))
        .route("/api/keys/:id/reactivate", post(reactivate_key))
        .route("/api/keys/:id/stats", get(key_stats))
        .fallback(not_found)
}
