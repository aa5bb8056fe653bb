//! LibreTranslate HTTP 客户端
//!
//! 超时由编排器按操作类型控制，客户端只设置连接超时。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{
    TranslatedFile, Translator, TranslatorError, TranslatorResult, UploadedFile,
    UpstreamTranslateRequest, UpstreamTranslation,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_FILE_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Serialize)]
struct TranslateBody<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    alternatives: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Serialize)]
struct DetectBody<'a> {
    q: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

/// LibreTranslate 客户端
#[derive(Debug, Clone)]
pub struct LibreTranslateClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl LibreTranslateClient {
    /// 创建客户端，`api_key` 为空字符串时视为未配置
    pub fn new(base_url: &str, api_key: Option<String>) -> TranslatorResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| TranslatorError::Transport(format!("无效的引擎地址 '{}': {}", base_url, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TranslatorError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.filter(|key| !key.is_empty()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> TranslatorResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| TranslatorError::Transport(e.to_string()))
    }

    /// 非 2xx 响应转为错误
    async fn check_status(response: reqwest::Response) -> TranslatorResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TranslatorError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn read_json(response: reqwest::Response) -> TranslatorResult<Value> {
        let response = Self::check_status(response).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| TranslatorError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Translator for LibreTranslateClient {
    async fn translate(
        &self,
        request: &UpstreamTranslateRequest,
    ) -> TranslatorResult<UpstreamTranslation> {
        let body = TranslateBody {
            q: &request.text,
            source: &request.source,
            target: &request.target,
            format: &request.format,
            alternatives: request.alternatives,
            api_key: self.api_key.as_deref(),
        };
        debug!(source = %request.source, target = %request.target, "调用引擎翻译");

        let response = self
            .http
            .post(self.endpoint("translate")?)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let response = Self::check_status(response).await?;

        response
            .json::<UpstreamTranslation>()
            .await
            .map_err(|e| TranslatorError::Decode(e.to_string()))
    }

    async fn detect(&self, text: &str) -> TranslatorResult<Value> {
        let body = DetectBody {
            q: text,
            api_key: self.api_key.as_deref(),
        };
        let response = self
            .http
            .post(self.endpoint("detect")?)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        Self::read_json(response).await
    }

    async fn languages(&self) -> TranslatorResult<Value> {
        let response = self
            .http
            .get(self.endpoint("languages")?)
            .send()
            .await
            .map_err(transport_error)?;
        Self::read_json(response).await
    }

    async fn translate_file(
        &self,
        file: &UploadedFile,
        source: &str,
        target: &str,
    ) -> TranslatorResult<TranslatedFile> {
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.content_type)
            .map_err(transport_error)?;
        let mut form = Form::new()
            .part("file", part)
            .text("source", source.to_string())
            .text("target", target.to_string());
        if let Some(ref api_key) = self.api_key {
            form = form.text("api_key", api_key.clone());
        }
        debug!(file = %file.file_name, size = file.bytes.len(), "调用引擎翻译文件");

        let response = self
            .http
            .post(self.endpoint("translate_file")?)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let response = Self::check_status(response).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_FILE_CONTENT_TYPE)
            .to_string();
        let bytes = response.bytes().await.map_err(transport_error)?;

        Ok(TranslatedFile {
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

fn transport_error(error: reqwest::Error) -> TranslatorError {
    TranslatorError::Transport(error.to_string())
}
