//! # 持久化存储
//!
//! 网关唯一的共享可变资源。三张逻辑表各自通过一个类型化的仓储接口访问：
//!
//! - `CacheRepository` - 翻译缓存条目
//! - `CredentialRepository` - API 密钥
//! - `UsageRepository` - 请求用量记录（只追加）
//!
//! 所有写操作都是针对存储的单条原子语句，调用方永远看不到查询文本。
//!
//! ## 后端
//!
//! - `sqlite` - 默认后端，内嵌 SQLite（WAL 模式）
//! - `mongo` - 可选 MongoDB 后端（`mongo` feature）

pub mod sqlite;

#[cfg(feature = "mongo")]
pub mod mongo;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use sqlite::SqliteStore;

#[cfg(feature = "mongo")]
pub use mongo::MongoStore;

/// 存储错误类型
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// 底层数据库错误
    #[error("数据库错误: {0}")]
    Backend(String),

    /// 唯一约束冲突
    #[error("唯一约束冲突: {0}")]
    Conflict(String),

    /// 行数据无法解码
    #[error("数据损坏: {0}")]
    Corrupt(String),

    /// 存储已关闭
    #[error("存储已关闭")]
    Closed,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 缓存的翻译结果
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub content_hash: String,
    pub source_lang: String,
    pub target_lang: String,
    pub original_text: String,
    pub translated_text: String,
    pub created_at: DateTime<Utc>,
    pub access_count: i64,
}

/// 缓存表聚合统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheAggregate {
    pub total_entries: i64,
    pub total_accesses: i64,
    pub avg_accesses_per_entry: f64,
}

/// API 密钥（调用方身份）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: i64,
    pub token: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub rate_limit: i64,
    pub usage_count: i64,
}

/// 待插入的 API 密钥
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub token: String,
    pub name: String,
    pub description: String,
    pub rate_limit: i64,
    pub created_at: DateTime<Utc>,
}

/// 可修改字段的部分更新（固定白名单）
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CredentialPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "rateLimit")]
    pub rate_limit: Option<i64>,
}

impl CredentialPatch {
    /// 是否没有任何可更新字段
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.rate_limit.is_none()
    }
}

/// 一次已完成请求的用量记录
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    /// 密钥 id（非外键，密钥删除后仍保留）；管理员请求为 0
    pub credential_id: i64,
    /// 记录时的密钥名称，仅供展示
    pub credential_name: String,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: i64,
    pub success: bool,
}

/// 按自然日聚合的用量
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub avg_response_time: f64,
}

/// 翻译缓存表
#[async_trait]
pub trait CacheRepository: Send + Sync {
    /// 查找 `created_at > fresh_after` 的条目并原子地递增访问计数
    async fn touch_fresh(
        &self,
        content_hash: &str,
        source_lang: &str,
        target_lang: &str,
        fresh_after: DateTime<Utc>,
    ) -> StoreResult<Option<CacheEntry>>;

    /// 按 (hash, source, target) 插入或替换
    async fn upsert(&self, entry: &CacheEntry) -> StoreResult<()>;

    async fn aggregate(&self) -> StoreResult<CacheAggregate>;

    /// 删除 `created_at <= cutoff` 的条目，返回删除数量
    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

/// API 密钥表
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn insert(&self, credential: &NewCredential) -> StoreResult<Credential>;

    /// 对启用状态的密钥原子地执行 `usage_count + 1` 与 `last_used_at = now`，返回更新后的行
    async fn touch_active(&self, token: &str, now: DateTime<Utc>)
        -> StoreResult<Option<Credential>>;

    /// 按创建时间倒序
    async fn list(&self, include_inactive: bool) -> StoreResult<Vec<Credential>>;

    async fn find(&self, id: i64) -> StoreResult<Option<Credential>>;

    async fn update(&self, id: i64, patch: &CredentialPatch) -> StoreResult<bool>;

    async fn set_active(&self, id: i64, active: bool) -> StoreResult<bool>;

    async fn delete(&self, id: i64) -> StoreResult<bool>;
}

/// 用量记录表
#[async_trait]
pub trait UsageRepository: Send + Sync {
    async fn append(&self, record: &UsageRecord) -> StoreResult<()>;

    /// 某密钥 id 自 `since` 起按 UTC 自然日分组的统计，最近的日期在前
    async fn daily_totals(
        &self,
        credential_id: i64,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<DailyUsage>>;
}

/// 存储生命周期
#[async_trait]
pub trait StoreLifecycle: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn close(&self) -> StoreResult<()>;
}

/// 存储后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Mongo,
}

/// 存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite 数据库文件路径，`:memory:` 表示内存数据库
    pub database_path: String,
    pub mongodb_url: String,
    pub mongodb_database: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            database_path: "./data/gateway.db".to_string(),
            mongodb_url: "mongodb://localhost:27017".to_string(),
            mongodb_database: "libre_gateway".to_string(),
        }
    }
}

/// 打开后的存储句柄，显式注入到各组件中
#[derive(Clone)]
pub struct Store {
    pub cache: Arc<dyn CacheRepository>,
    pub credentials: Arc<dyn CredentialRepository>,
    pub usage: Arc<dyn UsageRepository>,
    lifecycle: Arc<dyn StoreLifecycle>,
}

impl Store {
    /// 由同时实现三个仓储接口的后端构造
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: CacheRepository + CredentialRepository + UsageRepository + StoreLifecycle + 'static,
    {
        Self {
            cache: backend.clone(),
            credentials: backend.clone(),
            usage: backend.clone(),
            lifecycle: backend,
        }
    }

    /// 根据配置打开存储
    pub async fn open(config: &StoreConfig) -> StoreResult<Self> {
        match config.backend {
            StoreBackend::Sqlite => {
                let store = SqliteStore::open(&config.database_path)?;
                Ok(Self::from_backend(Arc::new(store)))
            }
            #[cfg(feature = "mongo")]
            StoreBackend::Mongo => {
                let store = MongoStore::connect(&config.mongodb_url, &config.mongodb_database).await?;
                Ok(Self::from_backend(Arc::new(store)))
            }
            #[cfg(not(feature = "mongo"))]
            StoreBackend::Mongo => Err(StoreError::Backend(
                "MongoDB 后端未启用，请使用 --features mongo 编译".to_string(),
            )),
        }
    }

    /// 内存 SQLite 存储（测试与临时运行）
    pub fn in_memory() -> StoreResult<Self> {
        Ok(Self::from_backend(Arc::new(SqliteStore::open_in_memory()?)))
    }

    pub fn backend_name(&self) -> &'static str {
        self.lifecycle.backend_name()
    }

    /// 关闭存储，之后的所有操作返回 `StoreError::Closed`
    pub async fn close(&self) -> StoreResult<()> {
        tracing::info!("关闭 {} 存储", self.backend_name());
        self.lifecycle.close().await
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("backend", &self.backend_name())
            .finish()
    }
}
