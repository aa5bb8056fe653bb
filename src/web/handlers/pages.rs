//! 服务描述、健康检查与 404

use std::sync::Arc;

use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::web::error::ErrorBody;
use crate::web::types::{AppState, CacheStatus, HealthResponse};

/// GET /
pub async fn index() -> Json<Value> {
    Json(json!({
        "name": "LibreTranslate API Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "translation": "/api/translate",
            "detection": "/api/detect",
            "languages": "/api/languages",
            "files": "/api/files/translate",
            "apiKeys": "/api/keys",
            "cache": {
                "stats": "/api/cache/stats",
                "clean": "/api/cache/clean"
            }
        },
        "documentation": {
            "authentication": "使用 X-API-Key 头或 api_key 查询参数",
            "admin": "管理操作使用 X-Admin-Key 头"
        }
    }))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        uptime: state.started_at.elapsed().as_secs_f64(),
        store: state.gateway.store_backend(),
        cache: CacheStatus {
            enabled: state.gateway.cache().enabled(),
            ttl_seconds: state.gateway.cache().ttl().as_secs(),
        },
    })
}

/// 未匹配的路由
pub async fn not_found(method: Method, uri: Uri) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "NotFound".to_string(),
            message: format!("路由 {} {} 不存在", method, uri.path()),
        }),
    )
}
