//! # 翻译引擎协作方
//!
//! 网关不做翻译，只把请求转发给外部翻译引擎。引擎通过 [`Translator`]
//! 接口注入，生产环境使用 [`LibreTranslateClient`]，测试中可替换为假实现。

pub mod libre;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use libre::LibreTranslateClient;

/// 翻译引擎错误
#[derive(Error, Debug, Clone)]
pub enum TranslatorError {
    /// 网络或连接错误
    #[error("请求翻译引擎失败: {0}")]
    Transport(String),

    /// 引擎返回非 2xx 状态
    #[error("翻译引擎返回状态 {status}: {body}")]
    Status { status: u16, body: String },

    /// 响应体无法解析
    #[error("无法解析翻译引擎响应: {0}")]
    Decode(String),
}

pub type TranslatorResult<T> = Result<T, TranslatorError>;

/// 发往引擎的文本翻译请求
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamTranslateRequest {
    pub text: String,
    pub source: String,
    pub target: String,
    /// `text` 或 `html`
    pub format: String,
    pub alternatives: u32,
}

/// 引擎的文本翻译结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamTranslation {
    pub translated_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_language: Option<Value>,
    #[serde(default)]
    pub alternatives: Vec<String>,
}

/// 上传的待翻译文件
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// 引擎返回的已翻译文件
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedFile {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// 翻译引擎接口
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, request: &UpstreamTranslateRequest)
        -> TranslatorResult<UpstreamTranslation>;

    /// 检测结果由引擎定义，原样返回
    async fn detect(&self, text: &str) -> TranslatorResult<Value>;

    async fn languages(&self) -> TranslatorResult<Value>;

    async fn translate_file(
        &self,
        file: &UploadedFile,
        source: &str,
        target: &str,
    ) -> TranslatorResult<TranslatedFile>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_tolerates_missing_optional_fields() {
        let parsed: UpstreamTranslation =
            serde_json::from_str(r#"{"translatedText":"Bonjour"}"#).unwrap();
        assert_eq!(parsed.translated_text, "Bonjour");
        assert!(parsed.detected_language.is_none());
        assert!(parsed.alternatives.is_empty());
    }

    #[test]
    fn test_translation_keeps_detected_language() {
        let parsed: UpstreamTranslation = serde_json::from_str(
            r#"{"translatedText":"Hola","detectedLanguage":{"confidence":90,"language":"en"},"alternatives":["Buenas"]}"#,
        )
        .unwrap();
        assert_eq!(parsed.detected_language.unwrap()["language"], "en");
        assert_eq!(parsed.alternatives, vec!["Buenas".to_string()]);
    }
}
