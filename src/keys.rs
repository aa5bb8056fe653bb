//! # API 密钥注册表
//!
//! 负责密钥的签发、校验与管理。完整令牌只在创建时返回一次，
//! 之后的列表与查询由展示层通过 [`mask_token`] 掩码。
//!
//! 校验时的 `usage_count + 1` 由存储的单条原子语句完成，并发校验不会丢失递增。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{helpers, GatewayResult};
use crate::store::{
    Credential, CredentialPatch, CredentialRepository, DailyUsage, NewCredential, StoreError,
};
use crate::usage::UsageRecorder;
use crate::utils::SharedClock;

/// 令牌前缀
pub const TOKEN_PREFIX: &str = "ltk_";

/// 默认随机部分长度
pub const DEFAULT_TOKEN_LENGTH: usize = 32;

/// 未指定时的默认配额
pub const DEFAULT_RATE_LIMIT: i64 = 1000;

/// 统计窗口（天，含今天）
pub const STATS_WINDOW_DAYS: i64 = 30;

const TOKEN_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

const MAX_CREATE_ATTEMPTS: usize = 3;

/// 校验通过的密钥信息（递增后的计数）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedKey {
    pub id: i64,
    pub name: String,
    pub rate_limit: i64,
    pub usage_count: i64,
}

impl From<Credential> for ValidatedKey {
    fn from(credential: Credential) -> Self {
        Self {
            id: credential.id,
            name: credential.name,
            rate_limit: credential.rate_limit,
            usage_count: credential.usage_count,
        }
    }
}

/// 统计中的密钥摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySummary {
    pub id: i64,
    pub name: String,
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// 单个密钥的用量统计
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStats {
    pub key: KeySummary,
    pub daily_stats: Vec<DailyUsage>,
}

/// 准入控制钩子，在校验成功后调用
///
/// 配额执行的扩展点。默认实现 [`Unrestricted`] 放行所有请求。
#[async_trait]
pub trait AdmissionPolicy: Send + Sync {
    async fn admit(&self, key: &ValidatedKey) -> GatewayResult<()>;
}

/// 不做任何限制
#[derive(Debug, Default, Clone, Copy)]
pub struct Unrestricted;

#[async_trait]
impl AdmissionPolicy for Unrestricted {
    async fn admit(&self, _key: &ValidatedKey) -> GatewayResult<()> {
        Ok(())
    }
}

/// 掩码令牌：保留前 10 位和后 4 位
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() < 14 {
        return "***".to_string();
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// 生成新令牌
pub fn generate_token(length: usize) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..length)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", TOKEN_PREFIX, suffix)
}

/// API 密钥注册表
#[derive(Clone)]
pub struct KeyRegistry {
    credentials: Arc<dyn CredentialRepository>,
    usage: UsageRecorder,
    clock: SharedClock,
    token_length: usize,
}

impl KeyRegistry {
    pub fn new(
        credentials: Arc<dyn CredentialRepository>,
        usage: UsageRecorder,
        clock: SharedClock,
        token_length: usize,
    ) -> Self {
        Self {
            credentials,
            usage,
            clock,
            token_length,
        }
    }

    /// 签发新密钥，返回包含完整令牌的记录
    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        rate_limit: Option<i64>,
    ) -> GatewayResult<Credential> {
        let name = name.trim();
        if name.is_empty() {
            return Err(helpers::missing_parameter("name"));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let new_credential = NewCredential {
                token: generate_token(self.token_length),
                name: name.to_string(),
                description: description.unwrap_or_default().to_string(),
                rate_limit: rate_limit.unwrap_or(DEFAULT_RATE_LIMIT),
                created_at: self.clock.now(),
            };

            match self.credentials.insert(&new_credential).await {
                Ok(credential) => {
                    info!(id = credential.id, name = %credential.name, "签发新 API 密钥");
                    return Ok(credential);
                }
                Err(StoreError::Conflict(reason)) if attempt < MAX_CREATE_ATTEMPTS => {
                    warn!("令牌冲突，重新生成 (第 {} 次): {}", attempt, reason);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 校验令牌；无效与已吊销对调用方不可区分
    pub async fn validate(&self, token: &str) -> GatewayResult<Option<ValidatedKey>> {
        if token.is_empty() {
            return Ok(None);
        }
        let credential = self.credentials.touch_active(token, self.clock.now()).await?;
        Ok(credential.map(ValidatedKey::from))
    }

    /// 按创建时间倒序列出
    pub async fn list(&self, include_inactive: bool) -> GatewayResult<Vec<Credential>> {
        Ok(self.credentials.list(include_inactive).await?)
    }

    pub async fn get(&self, id: i64) -> GatewayResult<Option<Credential>> {
        Ok(self.credentials.find(id).await?)
    }

    /// 部分更新；没有可更新字段时返回 false
    pub async fn update(&self, id: i64, patch: &CredentialPatch) -> GatewayResult<bool> {
        // 名称去除首尾空白，空名称不作为更新字段
        let patch = CredentialPatch {
            name: patch
                .name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            ..patch.clone()
        };
        if patch.is_empty() {
            return Ok(false);
        }
        let updated = self.credentials.update(id, &patch).await?;
        if updated {
            info!(id, "更新 API 密钥");
        }
        Ok(updated)
    }

    pub async fn revoke(&self, id: i64) -> GatewayResult<bool> {
        let found = self.credentials.set_active(id, false).await?;
        if found {
            info!(id, "吊销 API 密钥");
        }
        Ok(found)
    }

    pub async fn reactivate(&self, id: i64) -> GatewayResult<bool> {
        let found = self.credentials.set_active(id, true).await?;
        if found {
            info!(id, "重新启用 API 密钥");
        }
        Ok(found)
    }

    /// 永久删除，用量记录保留
    pub async fn delete(&self, id: i64) -> GatewayResult<bool> {
        let existed = self.credentials.delete(id).await?;
        if existed {
            info!(id, "永久删除 API 密钥");
        }
        Ok(existed)
    }

    /// 最近 30 天（含今天）按 UTC 自然日汇总
    pub async fn get_stats(&self, id: i64) -> GatewayResult<Option<KeyStats>> {
        let credential = match self.credentials.find(id).await? {
            Some(credential) => credential,
            None => return Ok(None),
        };

        let since = self.stats_window_start();
        let daily_stats = self.usage.daily_totals(credential.id, since).await?;

        Ok(Some(KeyStats {
            key: KeySummary {
                id: credential.id,
                name: credential.name,
                usage_count: credential.usage_count,
                last_used_at: credential.last_used_at,
            },
            daily_stats,
        }))
    }

    fn stats_window_start(&self) -> DateTime<Utc> {
        let today = self.clock.now().date_naive();
        let first_day = today - Duration::days(STATS_WINDOW_DAYS - 1);
        first_day.and_time(chrono::NaiveTime::MIN).and_utc()
    }
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("token_length", &self.token_length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::utils::ManualClock;
    use chrono::TimeZone;

    fn registry() -> (KeyRegistry, Arc<ManualClock>) {
        let store = Store::in_memory().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let usage = UsageRecorder::new(store.usage.clone(), clock.clone());
        let registry = KeyRegistry::new(store.credentials, usage, clock.clone(), DEFAULT_TOKEN_LENGTH);
        (registry, clock)
    }

    #[test]
    fn test_token_format() {
        let token = generate_token(32);
        assert!(token.starts_with(TOKEN_PREFIX));
        assert_eq!(token.len(), TOKEN_PREFIX.len() + 32);
        assert!(token[TOKEN_PREFIX.len()..]
            .bytes()
            .all(|b| TOKEN_ALPHABET.contains(&b)));
        assert_ne!(generate_token(32), token);
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("ltk_abcdefghijklmnopqrstuvwxyz"), "ltk_abcdef...wxyz");
        assert_eq!(mask_token("short"), "***");
        assert_eq!(mask_token("ltk_abcdef1234"), "ltk_abcdef...1234");
    }

    #[tokio::test]
    async fn test_create_defaults() {
        let (registry, _) = registry();
        let credential = registry.create("App", None, None).await.unwrap();

        assert_eq!(credential.description, "");
        assert_eq!(credential.rate_limit, DEFAULT_RATE_LIMIT);
        assert_eq!(credential.usage_count, 0);
        assert!(credential.active);
        assert!(credential.last_used_at.is_none());
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let (registry, _) = registry();
        let error = registry.create("  ", None, None).await.unwrap_err();
        assert_eq!(error.kind(), crate::error::ErrorKind::MissingParameter);
    }

    #[tokio::test]
    async fn test_validate_unknown_token() {
        let (registry, _) = registry();
        assert!(registry.validate("ltk_nope").await.unwrap().is_none());
        assert!(registry.validate("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_patch_reports_failure() {
        let (registry, _) = registry();
        let credential = registry.create("App", None, None).await.unwrap();
        assert!(!registry
            .update(credential.id, &CredentialPatch::default())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_update_trims_name() {
        let (registry, _) = registry();
        let credential = registry.create("App", None, None).await.unwrap();

        let patch = CredentialPatch {
            name: Some("  Renamed  ".to_string()),
            ..Default::default()
        };
        assert!(registry.update(credential.id, &patch).await.unwrap());
        let renamed = registry.get(credential.id).await.unwrap().unwrap();
        assert_eq!(renamed.name, "Renamed");

        let blank = CredentialPatch {
            name: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(!registry.update(credential.id, &blank).await.unwrap());
        assert_eq!(registry.get(credential.id).await.unwrap().unwrap().name, "Renamed");
    }

    #[tokio::test]
    async fn test_stats_survive_rename_and_ignore_namesakes() {
        let (registry, clock) = registry();
        clock.set(Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap());
        let first = registry.create("App", None, None).await.unwrap();
        let namesake = registry.create("App", None, None).await.unwrap();
        let usage = registry.usage.clone();
        let elapsed = std::time::Duration::from_millis(10);

        usage.record(first.id, "App", "/translate", elapsed, true).await.unwrap();
        usage.record(namesake.id, "App", "/translate", elapsed, true).await.unwrap();

        let patch = CredentialPatch {
            name: Some("Renamed".to_string()),
            ..Default::default()
        };
        registry.update(first.id, &patch).await.unwrap();
        usage.record(first.id, "Renamed", "/detect", elapsed, false).await.unwrap();

        let stats = registry.get_stats(first.id).await.unwrap().unwrap();
        assert_eq!(stats.key.name, "Renamed");
        assert_eq!(stats.daily_stats.len(), 1);
        assert_eq!(stats.daily_stats[0].total_requests, 2);
        assert_eq!(stats.daily_stats[0].successful_requests, 1);

        let other = registry.get_stats(namesake.id).await.unwrap().unwrap();
        assert_eq!(other.daily_stats[0].total_requests, 1);
    }

    #[tokio::test]
    async fn test_stats_window_excludes_old_days() {
        let (registry, clock) = registry();
        let credential = registry.create("App", None, None).await.unwrap();
        let usage = registry.usage.clone();

        usage
            .record(credential.id, "App", "/translate", std::time::Duration::from_millis(10), true)
            .await
            .unwrap();
        clock.advance(Duration::days(30));
        usage
            .record(credential.id, "App", "/translate", std::time::Duration::from_millis(10), true)
            .await
            .unwrap();

        let stats = registry.get_stats(credential.id).await.unwrap().unwrap();
        assert_eq!(stats.daily_stats.len(), 1);
        assert_eq!(stats.key.name, "App");

        assert!(registry.get_stats(9999).await.unwrap().is_none());
    }
}
