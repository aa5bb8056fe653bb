//! 错误到 HTTP 响应的映射
//!
//! 响应体统一为 `{ "error": <稳定错误代码>, "message": <说明> }`。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use crate::error::{helpers, ErrorKind, GatewayError};

/// 错误响应体
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// 处理器错误类型
pub type ApiError = (StatusCode, Json<ErrorBody>);

pub type ApiResult<T> = Result<T, ApiError>;

/// 错误代码对应的 HTTP 状态
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::MissingParameter => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::InvalidCredential => StatusCode::FORBIDDEN,
        ErrorKind::AdminRequired => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::UpstreamError => StatusCode::BAD_GATEWAY,
        ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::UnsupportedFileType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::InternalStoreError => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::ConfigError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// 构造错误响应；存储与配置错误的细节只写日志
pub fn api_error(error: GatewayError) -> ApiError {
    helpers::log_error(&error);
    let kind = error.kind();
    let message = match kind {
        ErrorKind::InternalStoreError | ErrorKind::ConfigError => "服务器内部错误".to_string(),
        _ => error.to_string(),
    };
    (
        status_for(kind),
        Json(ErrorBody {
            error: kind.as_str().to_string(),
            message,
        }),
    )
}

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        api_error(error)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        api_error(self).into_response()
    }
}
