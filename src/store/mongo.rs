//! MongoDB 存储后端
//!
//! 三个集合对应三张逻辑表，另有 `counters` 集合为密钥生成自增整数 ID。
//! 计数器通过 `find_one_and_update` + `$inc` 原子更新。

use async_trait::async_trait;
use bson::{doc, Document};
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    CacheAggregate, CacheEntry, CacheRepository, Credential, CredentialPatch,
    CredentialRepository, DailyUsage, NewCredential, StoreError, StoreLifecycle, StoreResult,
    UsageRecord, UsageRepository,
};

const DUPLICATE_KEY: i32 = 11000;

/// 缓存集合中的文档
#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    text_hash: String,
    source_lang: String,
    target_lang: String,
    original_text: String,
    translated_text: String,
    created_at: bson::DateTime,
    access_count: i64,
}

/// 密钥集合中的文档
#[derive(Debug, Serialize, Deserialize)]
struct CredentialDocument {
    #[serde(rename = "_id")]
    id: i64,
    key: String,
    name: String,
    description: String,
    created_at: bson::DateTime,
    last_used_at: Option<bson::DateTime>,
    is_active: bool,
    rate_limit: i64,
    usage_count: i64,
}

/// 用量集合中的文档
#[derive(Debug, Serialize, Deserialize)]
struct UsageDocument {
    #[serde(default)]
    api_key_id: i64,
    api_key: String,
    endpoint: String,
    timestamp: bson::DateTime,
    response_time: i64,
    success: bool,
}

impl From<CacheDocument> for CacheEntry {
    fn from(document: CacheDocument) -> Self {
        Self {
            content_hash: document.text_hash,
            source_lang: document.source_lang,
            target_lang: document.target_lang,
            original_text: document.original_text,
            translated_text: document.translated_text,
            created_at: document.created_at.to_chrono(),
            access_count: document.access_count,
        }
    }
}

impl From<&CacheEntry> for CacheDocument {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            text_hash: entry.content_hash.clone(),
            source_lang: entry.source_lang.clone(),
            target_lang: entry.target_lang.clone(),
            original_text: entry.original_text.clone(),
            translated_text: entry.translated_text.clone(),
            created_at: bson::DateTime::from_chrono(entry.created_at),
            access_count: entry.access_count,
        }
    }
}

impl From<CredentialDocument> for Credential {
    fn from(document: CredentialDocument) -> Self {
        Self {
            id: document.id,
            token: document.key,
            name: document.name,
            description: document.description,
            created_at: document.created_at.to_chrono(),
            last_used_at: document.last_used_at.map(|at| at.to_chrono()),
            active: document.is_active,
            rate_limit: document.rate_limit,
            usage_count: document.usage_count,
        }
    }
}

/// MongoDB 后端
pub struct MongoStore {
    client: Client,
    database: Database,
    cache: Collection<CacheDocument>,
    credentials: Collection<CredentialDocument>,
    usage: Collection<UsageDocument>,
    counters: Collection<Document>,
}

impl MongoStore {
    /// 连接数据库并创建索引
    pub async fn connect(url: &str, database_name: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(url).await.map_err(backend_error)?;
        let database = client.database(database_name);

        let store = Self {
            cache: database.collection("translation_cache"),
            credentials: database.collection("api_keys"),
            usage: database.collection("usage_stats"),
            counters: database.collection("counters"),
            database,
            client,
        };
        store.create_indexes().await?;

        info!(database = %database_name, "MongoDB 存储已连接");
        Ok(store)
    }

    /// 创建查询所需的索引
    async fn create_indexes(&self) -> StoreResult<()> {
        self.cache
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! { "text_hash": 1, "source_lang": 1, "target_lang": 1 })
                    .options(
                        IndexOptions::builder()
                            .unique(true)
                            .name("idx_cache_lookup".to_string())
                            .build(),
                    )
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "created_at": 1 })
                    .options(IndexOptions::builder().name("idx_cache_created".to_string()).build())
                    .build(),
            ])
            .await
            .map_err(backend_error)?;

        self.credentials
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! { "key": 1 })
                    .options(
                        IndexOptions::builder()
                            .unique(true)
                            .name("idx_api_keys_key".to_string())
                            .build(),
                    )
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "key": 1, "is_active": 1 })
                    .options(IndexOptions::builder().name("idx_api_keys_active".to_string()).build())
                    .build(),
            ])
            .await
            .map_err(backend_error)?;

        self.usage
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "api_key_id": 1, "timestamp": -1 })
                    .options(IndexOptions::builder().name("idx_usage_key_time".to_string()).build())
                    .build(),
            )
            .await
            .map_err(backend_error)?;

        Ok(())
    }

    /// 原子地获取下一个密钥 ID
    async fn next_credential_id(&self) -> StoreResult<i64> {
        let counter = self
            .counters
            .find_one_and_update(doc! { "_id": "api_keys" }, doc! { "$inc": { "seq": 1_i64 } })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(backend_error)?
            .ok_or_else(|| StoreError::Corrupt("计数器文档缺失".to_string()))?;

        counter
            .get_i64("seq")
            .map_err(|e| StoreError::Corrupt(format!("计数器字段无效: {}", e)))
    }
}

#[async_trait]
impl CacheRepository for MongoStore {
    async fn touch_fresh(
        &self,
        content_hash: &str,
        source_lang: &str,
        target_lang: &str,
        fresh_after: DateTime<Utc>,
    ) -> StoreResult<Option<CacheEntry>> {
        let filter = doc! {
            "text_hash": content_hash,
            "source_lang": source_lang,
            "target_lang": target_lang,
            "created_at": { "$gt": bson::DateTime::from_chrono(fresh_after) },
        };
        let document = self
            .cache
            .find_one_and_update(filter, doc! { "$inc": { "access_count": 1_i64 } })
            .return_document(ReturnDocument::After)
            .await
            .map_err(backend_error)?;
        Ok(document.map(CacheEntry::from))
    }

    async fn upsert(&self, entry: &CacheEntry) -> StoreResult<()> {
        let filter = doc! {
            "text_hash": &entry.content_hash,
            "source_lang": &entry.source_lang,
            "target_lang": &entry.target_lang,
        };
        self.cache
            .replace_one(filter, CacheDocument::from(entry))
            .upsert(true)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn aggregate(&self) -> StoreResult<CacheAggregate> {
        let pipeline = vec![doc! {
            "$group": {
                "_id": null,
                "total_entries": { "$sum": 1_i64 },
                "total_accesses": { "$sum": "$access_count" },
                "avg_accesses": { "$avg": "$access_count" },
            }
        }];
        let mut cursor = self.cache.aggregate(pipeline).await.map_err(backend_error)?;

        match cursor.try_next().await.map_err(backend_error)? {
            Some(result) => Ok(CacheAggregate {
                total_entries: read_i64(&result, "total_entries")?,
                total_accesses: read_i64(&result, "total_accesses")?,
                avg_accesses_per_entry: result.get_f64("avg_accesses").unwrap_or(0.0),
            }),
            None => Ok(CacheAggregate::default()),
        }
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = self
            .cache
            .delete_many(doc! { "created_at": { "$lte": bson::DateTime::from_chrono(cutoff) } })
            .await
            .map_err(backend_error)?;
        Ok(result.deleted_count)
    }
}

#[async_trait]
impl CredentialRepository for MongoStore {
    async fn insert(&self, credential: &NewCredential) -> StoreResult<Credential> {
        let document = CredentialDocument {
            id: self.next_credential_id().await?,
            key: credential.token.clone(),
            name: credential.name.clone(),
            description: credential.description.clone(),
            created_at: bson::DateTime::from_chrono(credential.created_at),
            last_used_at: None,
            is_active: true,
            rate_limit: credential.rate_limit,
            usage_count: 0,
        };
        self.credentials
            .insert_one(&document)
            .await
            .map_err(map_write_error)?;
        Ok(Credential::from(document))
    }

    async fn touch_active(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Credential>> {
        let document = self
            .credentials
            .find_one_and_update(
                doc! { "key": token, "is_active": true },
                doc! {
                    "$inc": { "usage_count": 1_i64 },
                    "$set": { "last_used_at": bson::DateTime::from_chrono(now) },
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(backend_error)?;
        Ok(document.map(Credential::from))
    }

    async fn list(&self, include_inactive: bool) -> StoreResult<Vec<Credential>> {
        let filter = if include_inactive {
            doc! {}
        } else {
            doc! { "is_active": true }
        };
        let cursor = self
            .credentials
            .find(filter)
            .sort(doc! { "created_at": -1, "_id": -1 })
            .await
            .map_err(backend_error)?;
        let documents: Vec<CredentialDocument> =
            cursor.try_collect().await.map_err(backend_error)?;
        Ok(documents.into_iter().map(Credential::from).collect())
    }

    async fn find(&self, id: i64) -> StoreResult<Option<Credential>> {
        let document = self
            .credentials
            .find_one(doc! { "_id": id })
            .await
            .map_err(backend_error)?;
        Ok(document.map(Credential::from))
    }

    async fn update(&self, id: i64, patch: &CredentialPatch) -> StoreResult<bool> {
        let mut fields = Document::new();
        if let Some(ref name) = patch.name {
            fields.insert("name", name);
        }
        if let Some(ref description) = patch.description {
            fields.insert("description", description);
        }
        if let Some(rate_limit) = patch.rate_limit {
            fields.insert("rate_limit", rate_limit);
        }
        if fields.is_empty() {
            return Ok(false);
        }

        let result = self
            .credentials
            .update_one(doc! { "_id": id }, doc! { "$set": fields })
            .await
            .map_err(backend_error)?;
        Ok(result.matched_count > 0)
    }

    async fn set_active(&self, id: i64, active: bool) -> StoreResult<bool> {
        let result = self
            .credentials
            .update_one(doc! { "_id": id }, doc! { "$set": { "is_active": active } })
            .await
            .map_err(backend_error)?;
        Ok(result.matched_count > 0)
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let result = self
            .credentials
            .delete_one(doc! { "_id": id })
            .await
            .map_err(backend_error)?;
        Ok(result.deleted_count > 0)
    }
}

#[async_trait]
impl UsageRepository for MongoStore {
    async fn append(&self, record: &UsageRecord) -> StoreResult<()> {
        let document = UsageDocument {
            api_key_id: record.credential_id,
            api_key: record.credential_name.clone(),
            endpoint: record.endpoint.clone(),
            timestamp: bson::DateTime::from_chrono(record.timestamp),
            response_time: record.response_time_ms,
            success: record.success,
        };
        self.usage.insert_one(document).await.map_err(backend_error)?;
        Ok(())
    }

    async fn daily_totals(
        &self,
        credential_id: i64,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<DailyUsage>> {
        let pipeline = vec![
            doc! {
                "$match": {
                    "api_key_id": credential_id,
                    "timestamp": { "$gte": bson::DateTime::from_chrono(since) },
                }
            },
            doc! {
                "$group": {
                    "_id": { "$dateToString": { "format": "%Y-%m-%d", "date": "$timestamp" } },
                    "total_requests": { "$sum": 1_i64 },
                    "successful_requests": { "$sum": { "$cond": ["$success", 1_i64, 0_i64] } },
                    "avg_response_time": { "$avg": "$response_time" },
                }
            },
            doc! { "$sort": { "_id": -1 } },
        ];

        let cursor = self.usage.aggregate(pipeline).await.map_err(backend_error)?;
        let groups: Vec<Document> = cursor.try_collect().await.map_err(backend_error)?;

        groups
            .iter()
            .map(|group| {
                let day = group
                    .get_str("_id")
                    .map_err(|e| StoreError::Corrupt(format!("分组日期缺失: {}", e)))?;
                let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")
                    .map_err(|e| StoreError::Corrupt(format!("无法解析日期 '{}': {}", day, e)))?;
                Ok(DailyUsage {
                    date,
                    total_requests: read_i64(group, "total_requests")?,
                    successful_requests: read_i64(group, "successful_requests")?,
                    avg_response_time: group.get_f64("avg_response_time").unwrap_or(0.0),
                })
            })
            .collect()
    }
}

#[async_trait]
impl StoreLifecycle for MongoStore {
    fn backend_name(&self) -> &'static str {
        "mongodb"
    }

    async fn close(&self) -> StoreResult<()> {
        info!(database = %self.database.name(), "断开 MongoDB 连接");
        self.client.clone().shutdown().await;
        Ok(())
    }
}

/// `$sum` 结果可能是 Int32 或 Int64
fn read_i64(document: &Document, key: &str) -> StoreResult<i64> {
    match document.get(key) {
        Some(bson::Bson::Int64(value)) => Ok(*value),
        Some(bson::Bson::Int32(value)) => Ok(i64::from(*value)),
        Some(bson::Bson::Double(value)) => Ok(*value as i64),
        Some(bson::Bson::Null) | None => Ok(0),
        Some(other) => Err(StoreError::Corrupt(format!("字段 {} 类型异常: {:?}", key, other))),
    }
}

fn backend_error(error: mongodb::error::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

fn map_write_error(error: mongodb::error::Error) -> StoreError {
    if let ErrorKind::Write(WriteFailure::WriteError(ref write_error)) = *error.kind {
        if write_error.code == DUPLICATE_KEY {
            return StoreError::Conflict(write_error.message.clone());
        }
    }
    backend_error(error)
}
