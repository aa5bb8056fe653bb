//! 文件翻译处理器

use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::error::{helpers, GatewayError, GatewayResult};
use crate::gateway::FileTranslateRequest;
use crate::translator::UploadedFile;
use crate::web::auth::Credentials;
use crate::web::error::ApiResult;
use crate::web::types::AppState;

const DEFAULT_UPLOAD_TYPE: &str = "application/octet-stream";

/// POST /api/files/translate
///
/// multipart 字段：`file`（必需）、`source`、`target`、`api_key`
///
/// 表单解析失败不会直接返回，交给编排器在认证之后报告
pub async fn translate_file(
    State(state): State<Arc<AppState>>,
    Credentials(credentials): Credentials,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Response> {
    let limit = state.gateway.settings().max_upload_bytes;
    let mut form_key = None;
    let upload = match multipart {
        Ok(multipart) => read_upload(multipart, limit, &mut form_key).await,
        Err(rejection) => {
            debug!("文件上传请求无效: {}", rejection.body_text());
            Err(helpers::missing_parameter(format!(
                "无效的 multipart 请求: {}",
                rejection.body_text()
            )))
        }
    };

    let credentials = credentials.or_api_key(form_key);
    let outcome = state.gateway.translate_upload(&credentials, upload).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        sanitize_file_name(&outcome.file_name)
    );

    Ok((
        [
            (header::CONTENT_TYPE, outcome.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        outcome.bytes,
    )
        .into_response())
}

/// 读取 multipart 表单；出错前已读到的 `api_key` 仍写入 `form_key`
async fn read_upload(
    mut multipart: Multipart,
    limit: usize,
    form_key: &mut Option<String>,
) -> GatewayResult<FileTranslateRequest> {
    let mut request = FileTranslateRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("file").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_UPLOAD_TYPE)
                    .to_string();
                let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                request.file = Some(UploadedFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "source" => {
                request.source = Some(field.text().await.map_err(|e| multipart_error(e, limit))?);
            }
            "target" => {
                request.target = Some(field.text().await.map_err(|e| multipart_error(e, limit))?);
            }
            "api_key" => {
                *form_key = Some(field.text().await.map_err(|e| multipart_error(e, limit))?);
            }
            _ => {}
        }
    }

    Ok(request)
}

fn multipart_error(error: MultipartError, limit: usize) -> GatewayError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        GatewayError::PayloadTooLarge { limit }
    } else {
        helpers::missing_parameter(format!("无效的 multipart 请求: {}", error.body_text()))
    }
}

/// 去掉无法放入响应头的字符
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
