//! 文本翻译、语言检测与语言列表

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Json;
use serde_json::Value;
use tracing::debug;

use crate::gateway::TranslateOutcome;
use crate::web::auth::Credentials;
use crate::web::error::ApiResult;
use crate::web::types::{AppState, DetectRequest, TranslateBody};

/// POST /api/translate
///
/// 请求体无法解析时按空请求处理，由编排器在认证之后报告缺少参数
pub async fn translate(
    State(state): State<Arc<AppState>>,
    Credentials(credentials): Credentials,
    body: Result<Json<TranslateBody>, JsonRejection>,
) -> ApiResult<Json<TranslateOutcome>> {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            debug!("翻译请求体无效: {}", rejection.body_text());
            TranslateBody::default()
        }
    };

    let credentials = credentials.or_api_key(body.api_key);
    let outcome = state.gateway.translate(&credentials, body.request).await?;
    Ok(Json(outcome))
}

/// POST /api/detect
pub async fn detect(
    State(state): State<Arc<AppState>>,
    Credentials(credentials): Credentials,
    body: Result<Json<DetectRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let credentials = credentials.or_api_key(request.api_key);
    let detection = state.gateway.detect(&credentials, request.q).await?;
    Ok(Json(detection))
}

/// GET /api/languages（无需认证）
pub async fn languages(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    Ok(Json(state.gateway.languages().await?))
}
