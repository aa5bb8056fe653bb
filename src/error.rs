//! 网关统一错误处理
//!
//! 提供结构化错误类型、稳定的错误代码以及按严重程度记录日志的助手

use std::fmt;

use thiserror::Error;

use crate::store::StoreError;
use crate::translator::TranslatorError;

/// 网关错误类型
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// 缺少必需参数
    #[error("缺少参数: {0}")]
    MissingParameter(String),

    /// 未提供任何凭证
    #[error("缺少 API 密钥: 请通过 X-API-Key 头或 api_key 参数提供")]
    Unauthenticated,

    /// 凭证不存在或已被吊销（对调用方不可区分）
    #[error("API 密钥无效或已被吊销")]
    InvalidCredential,

    /// 需要管理员权限
    #[error("该操作需要管理员权限")]
    AdminRequired,

    /// 资源不存在
    #[error("未找到: {0}")]
    NotFound(String),

    /// 准入策略拒绝（配额扩展点）
    #[error("请求被拒绝: {0}")]
    QuotaExceeded(String),

    /// 上游翻译引擎超时
    #[error("翻译引擎响应超时 ({0})")]
    UpstreamTimeout(String),

    /// 上游翻译引擎错误
    #[error("翻译服务错误: {0}")]
    UpstreamError(String),

    /// 请求体过大
    #[error("文件过大: 超过允许的 {limit} 字节")]
    PayloadTooLarge { limit: usize },

    /// 不支持的文件类型
    #[error("不支持的文件类型: {0}")]
    UnsupportedFileType(String),

    /// 存储错误
    #[error("存储错误: {0}")]
    InternalStoreError(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),
}

/// 稳定的错误代码，对外响应中使用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingParameter,
    Unauthenticated,
    InvalidCredential,
    AdminRequired,
    NotFound,
    QuotaExceeded,
    UpstreamTimeout,
    UpstreamError,
    PayloadTooLarge,
    UnsupportedFileType,
    InternalStoreError,
    ConfigError,
}

impl ErrorKind {
    /// 错误代码字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingParameter => "MissingParameter",
            ErrorKind::Unauthenticated => "Unauthenticated",
            ErrorKind::InvalidCredential => "InvalidCredential",
            ErrorKind::AdminRequired => "AdminRequired",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::QuotaExceeded => "QuotaExceeded",
            ErrorKind::UpstreamTimeout => "UpstreamTimeout",
            ErrorKind::UpstreamError => "UpstreamError",
            ErrorKind::PayloadTooLarge => "PayloadTooLarge",
            ErrorKind::UnsupportedFileType => "UnsupportedFileType",
            ErrorKind::InternalStoreError => "InternalStoreError",
            ErrorKind::ConfigError => "ConfigError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl GatewayError {
    /// 获取错误代码
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::MissingParameter(_) => ErrorKind::MissingParameter,
            GatewayError::Unauthenticated => ErrorKind::Unauthenticated,
            GatewayError::InvalidCredential => ErrorKind::InvalidCredential,
            GatewayError::AdminRequired => ErrorKind::AdminRequired,
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            GatewayError::UpstreamTimeout(_) => ErrorKind::UpstreamTimeout,
            GatewayError::UpstreamError(_) => ErrorKind::UpstreamError,
            GatewayError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            GatewayError::UnsupportedFileType(_) => ErrorKind::UnsupportedFileType,
            GatewayError::InternalStoreError(_) => ErrorKind::InternalStoreError,
            GatewayError::ConfigError(_) => ErrorKind::ConfigError,
        }
    }

    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            GatewayError::MissingParameter(_) => ErrorSeverity::Info,
            GatewayError::Unauthenticated => ErrorSeverity::Info,
            GatewayError::InvalidCredential => ErrorSeverity::Warning,
            GatewayError::AdminRequired => ErrorSeverity::Warning,
            GatewayError::NotFound(_) => ErrorSeverity::Info,
            GatewayError::QuotaExceeded(_) => ErrorSeverity::Warning,
            GatewayError::UpstreamTimeout(_) => ErrorSeverity::Warning,
            GatewayError::UpstreamError(_) => ErrorSeverity::Error,
            GatewayError::PayloadTooLarge { .. } => ErrorSeverity::Info,
            GatewayError::UnsupportedFileType(_) => ErrorSeverity::Info,
            GatewayError::InternalStoreError(_) => ErrorSeverity::Critical,
            GatewayError::ConfigError(_) => ErrorSeverity::Critical,
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(error: StoreError) -> Self {
        GatewayError::InternalStoreError(error.to_string())
    }
}

/// 上游错误的细节只写日志，对调用方返回通用消息
impl From<TranslatorError> for GatewayError {
    fn from(error: TranslatorError) -> Self {
        tracing::warn!("翻译引擎调用失败: {}", error);
        GatewayError::UpstreamError("翻译引擎请求失败".to_string())
    }
}

impl From<tokio::time::error::Elapsed> for GatewayError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        GatewayError::UpstreamTimeout(error.to_string())
    }
}

/// 错误结果类型别名
pub type GatewayResult<T> = Result<T, GatewayError>;

/// 错误处理助手函数
pub mod helpers {
    use super::*;

    /// 按严重程度记录错误
    pub fn log_error(error: &GatewayError) {
        match error.severity() {
            ErrorSeverity::Info => tracing::info!(kind = %error.kind(), "{}", error),
            ErrorSeverity::Warning => tracing::warn!(kind = %error.kind(), "{}", error),
            ErrorSeverity::Error => tracing::error!(kind = %error.kind(), "{}", error),
            ErrorSeverity::Critical => tracing::error!(kind = %error.kind(), "严重错误: {}", error),
        }
    }

    /// 创建缺少参数错误
    pub fn missing_parameter<T: fmt::Display>(msg: T) -> GatewayError {
        GatewayError::MissingParameter(msg.to_string())
    }

    /// 创建未找到错误
    pub fn not_found<T: fmt::Display>(msg: T) -> GatewayError {
        GatewayError::NotFound(msg.to_string())
    }

    /// 创建配置错误
    pub fn config_error<T: fmt::Display>(msg: T) -> GatewayError {
        GatewayError::ConfigError(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_maps_to_internal() {
        let error: GatewayError = StoreError::Backend("disk I/O error".to_string()).into();
        assert_eq!(error.kind(), ErrorKind::InternalStoreError);
        assert_eq!(error.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_upstream_error_message_is_generic() {
        let error: GatewayError = TranslatorError::Status {
            status: 500,
            body: "stack trace from engine".to_string(),
        }
        .into();
        assert_eq!(error.kind(), ErrorKind::UpstreamError);
        assert!(!error.to_string().contains("stack trace"));
    }

    #[test]
    fn test_config_error_is_critical() {
        let error = helpers::config_error("无法绑定 0.0.0.0:3000");
        assert_eq!(error.kind(), ErrorKind::ConfigError);
        assert_eq!(error.severity(), ErrorSeverity::Critical);
    }
}
