//! Web 模块的数据类型定义

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::{Gateway, TranslateRequest};
use crate::keys::{mask_token, ValidatedKey};
use crate::store::Credential;

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            started_at: Instant::now(),
        }
    }
}

/// 文本翻译请求体，`api_key` 是优先级最低的凭证来源
#[derive(Debug, Default, Deserialize)]
pub struct TranslateBody {
    #[serde(flatten)]
    pub request: TranslateRequest,
    pub api_key: Option<String>,
}

/// 语言检测请求
#[derive(Debug, Default, Deserialize)]
pub struct DetectRequest {
    pub q: Option<String>,
    pub api_key: Option<String>,
}

/// 创建密钥请求
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "rate_limit")]
    pub rate_limit: Option<i64>,
}

/// 列表查询参数
#[derive(Debug, Default, Deserialize)]
pub struct ListKeysQuery {
    pub include_inactive: Option<String>,
}

impl ListKeysQuery {
    pub fn include_inactive(&self) -> bool {
        self.include_inactive.as_deref() == Some("true")
    }
}

/// 对外展示的密钥
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyView {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub rate_limit: i64,
    pub usage_count: i64,
}

impl KeyView {
    /// 包含完整令牌，仅用于创建响应
    pub fn revealed(credential: Credential) -> Self {
        Self::with_key(credential.token.clone(), credential)
    }

    pub fn masked(credential: Credential) -> Self {
        Self::with_key(mask_token(&credential.token), credential)
    }

    fn with_key(key: String, credential: Credential) -> Self {
        Self {
            id: credential.id,
            key,
            name: credential.name,
            description: credential.description,
            created_at: credential.created_at,
            last_used_at: credential.last_used_at,
            is_active: credential.active,
            rate_limit: credential.rate_limit,
            usage_count: credential.usage_count,
        }
    }
}

/// 创建密钥响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedKeyResponse {
    pub message: String,
    pub api_key: KeyView,
}

/// 只有消息的响应
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// 缓存清理响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeResponse {
    pub message: String,
    pub deleted_entries: u64,
}

/// 当前密钥校验响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentKeyResponse {
    pub valid: bool,
    pub admin: bool,
    pub api_key: Option<ValidatedKey>,
}

/// 健康检查响应
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime: f64,
    pub store: &'static str,
    pub cache: CacheStatus,
}

/// 缓存开关与 TTL
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub enabled: bool,
    pub ttl_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> Credential {
        Credential {
            id: 3,
            token: "ltk_abcdefghijklmnopqrstuvwxyz012345".to_string(),
            name: "App".to_string(),
            description: String::new(),
            created_at: Utc::now(),
            last_used_at: None,
            active: true,
            rate_limit: 1000,
            usage_count: 0,
        }
    }

    #[test]
    fn test_masked_view_hides_token() {
        let view = KeyView::masked(credential());
        assert_eq!(view.key, "ltk_abcdef...2345");

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["isActive"], true);
        assert_eq!(json["rateLimit"], 1000);
    }

    #[test]
    fn test_revealed_view_keeps_token() {
        let view = KeyView::revealed(credential());
        assert_eq!(view.key, "ltk_abcdefghijklmnopqrstuvwxyz012345");
    }

    #[test]
    fn test_create_request_accepts_both_spellings() {
        let camel: CreateKeyRequest = serde_json::from_str(r#"{"name":"A","rateLimit":5}"#).unwrap();
        let snake: CreateKeyRequest = serde_json::from_str(r#"{"name":"A","rate_limit":5}"#).unwrap();
        assert_eq!(camel.rate_limit, Some(5));
        assert_eq!(snake.rate_limit, Some(5));
    }
}
