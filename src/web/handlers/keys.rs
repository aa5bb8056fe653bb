//! API 密钥管理处理器
//!
//! 除 `validate/current` 外均需要管理员密钥。完整令牌只在创建响应中出现。

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;

use crate::error::helpers;
use crate::gateway::{Caller, PresentedCredentials};
use crate::keys::KeyStats;
use crate::store::CredentialPatch;
use crate::web::auth::Credentials;
use crate::web::error::ApiResult;
use crate::web::types::{
    AppState, CreateKeyRequest, CreatedKeyResponse, CurrentKeyResponse, KeyView, ListKeysQuery,
    MessageResponse,
};

/// POST /api/keys
pub async fn create_key(
    State(state): State<Arc<AppState>>,
    Credentials(credentials): Credentials,
    body: Result<Json<CreateKeyRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreatedKeyResponse>)> {
    let request = body.map(|Json(request)| request).unwrap_or_default();

    let credential = state
        .gateway
        .create_key(
            &credentials,
            request.name.as_deref(),
            request.description.as_deref(),
            request.rate_limit,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedKeyResponse {
            message: "API 密钥创建成功".to_string(),
            api_key: KeyView::revealed(credential),
        }),
    ))
}

/// GET /api/keys
pub async fn list_keys(
    State(state): State<Arc<AppState>>,
    Credentials(credentials): Credentials,
    query: Result<Query<ListKeysQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<KeyView>>> {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            state.gateway.require_admin(&credentials)?;
            return Err(helpers::missing_parameter(format!(
                "无效的查询参数: {}",
                rejection.body_text()
            ))
            .into());
        }
    };
    let keys = state
        .gateway
        .list_keys(&credentials, query.include_inactive())
        .await?;
    Ok(Json(keys.into_iter().map(KeyView::masked).collect()))
}

/// GET /api/keys/:id
pub async fn get_key(
    State(state): State<Arc<AppState>>,
    Credentials(credentials): Credentials,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<KeyView>> {
    let id = key_id(&state, &credentials, path)?;
    let credential = state.gateway.get_key(&credentials, id).await?;
    Ok(Json(KeyView::masked(credential)))
}

/// PATCH /api/keys/:id
pub async fn update_key(
    State(state): State<Arc<AppState>>,
    Credentials(credentials): Credentials,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<CredentialPatch>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let id = key_id(&state, &credentials, path)?;
    let patch = body.map(|Json(patch)| patch).unwrap_or_default();
    state.gateway.update_key(&credentials, id, &patch).await?;
    Ok(Json(MessageResponse::new("API 密钥已更新")))
}

/// POST /api/keys/:id/revoke
pub async fn revoke_key(
    State(state): State<Arc<AppState>>,
    Credentials(credentials): Credentials,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let id = key_id(&state, &credentials, path)?;
    state.gateway.revoke_key(&credentials, id).await?;
    Ok(Json(MessageResponse::new("API 密钥已吊销")))
}

/// POST /api/keys/:id/reactivate
pub async fn reactivate_key(
    State(state): State<Arc<AppState>>,
    Credentials(credentials): Credentials,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let id = key_id(&state, &credentials, path)?;
    state.gateway.reactivate_key(&credentials, id).await?;
    Ok(Json(MessageResponse::new("API 密钥已重新启用")))
}

/// DELETE /api/keys/:id
pub async fn delete_key(
    State(state): State<Arc<AppState>>,
    Credentials(credentials): Credentials,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let id = key_id(&state, &credentials, path)?;
    state.gateway.delete_key(&credentials, id).await?;
    Ok(Json(MessageResponse::new("API 密钥已永久删除")))
}

/// GET /api/keys/:id/stats
pub async fn key_stats(
    State(state): State<Arc<AppState>>,
    Credentials(credentials): Credentials,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<KeyStats>> {
    let id = key_id(&state, &credentials, path)?;
    Ok(Json(state.gateway.key_stats(&credentials, id).await?))
}

/// GET /api/keys/validate/current
pub async fn validate_current(
    State(state): State<Arc<AppState>>,
    Credentials(credentials): Credentials,
) -> ApiResult<Json<CurrentKeyResponse>> {
    let caller = state.gateway.authenticate(&credentials).await?;
    let response = match caller {
        Caller::Admin => CurrentKeyResponse {
            valid: true,
            admin: true,
            api_key: None,
        },
        Caller::Key(key) => CurrentKeyResponse {
            valid: true,
            admin: false,
            api_key: Some(key),
        },
    };
    Ok(Json(response))
}

/// 路径中的 id 无法解析：非管理员仍得到 403，管理员得到 404
fn key_id(
    state: &AppState,
    credentials: &PresentedCredentials,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<i64> {
    match path {
        Ok(Path(id)) => Ok(id),
        Err(rejection) => {
            state.gateway.require_admin(credentials)?;
            Err(helpers::not_found(format!("无效的密钥 id: {}", rejection.body_text())).into())
        }
    }
}
