//! SQLite 存储后端
//!
//! 单连接 + 互斥锁，WAL 模式。每个写操作都是一条原子语句
//! （`INSERT OR REPLACE`、`UPDATE ... RETURNING`），计数器递增由 SQLite 自身保证不丢失。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use tracing::{debug, info};

use super::{
    CacheAggregate, CacheEntry, CacheRepository, Credential, CredentialPatch,
    CredentialRepository, DailyUsage, NewCredential, StoreError, StoreLifecycle, StoreResult,
    UsageRecord, UsageRepository,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS api_keys (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        key TEXT UNIQUE NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL,
        last_used_at INTEGER,
        is_active INTEGER NOT NULL DEFAULT 1,
        rate_limit INTEGER NOT NULL DEFAULT 1000,
        usage_count INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS translation_cache (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        text_hash TEXT NOT NULL,
        source_lang TEXT NOT NULL,
        target_lang TEXT NOT NULL,
        original_text TEXT NOT NULL,
        translated_text TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        access_count INTEGER NOT NULL DEFAULT 1,
        UNIQUE(text_hash, source_lang, target_lang)
    );

    CREATE TABLE IF NOT EXISTS usage_stats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        api_key_id INTEGER NOT NULL DEFAULT 0,
        api_key TEXT NOT NULL,
        endpoint TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        response_time INTEGER NOT NULL,
        success INTEGER NOT NULL DEFAULT 1
    );

    CREATE INDEX IF NOT EXISTS idx_cache_lookup
        ON translation_cache(text_hash, source_lang, target_lang);

    CREATE INDEX IF NOT EXISTS idx_cache_created
        ON translation_cache(created_at);

    CREATE INDEX IF NOT EXISTS idx_api_keys_active
        ON api_keys(key) WHERE is_active = 1;
";

/// 依赖 `api_key_id` 列，需在旧表补列之后创建
const USAGE_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS idx_usage_key_time
        ON usage_stats(api_key_id, timestamp);
";

const CREDENTIAL_COLUMNS: &str =
    "id, key, name, description, created_at, last_used_at, is_active, rate_limit, usage_count";

const CACHE_COLUMNS: &str =
    "text_hash, source_lang, target_lang, original_text, translated_text, created_at, access_count";

/// SQLite 后端
pub struct SqliteStore {
    conn: Arc<Mutex<Option<Connection>>>,
    label: String,
}

impl SqliteStore {
    /// 打开（或创建）数据库文件，路径支持 `~` 展开；`:memory:` 打开内存数据库
    pub fn open(path: &str) -> StoreResult<Self> {
        if path == ":memory:" {
            return Self::open_in_memory();
        }

        let expanded = shellexpand::tilde(path).to_string();
        if let Some(dir) = Path::new(&expanded).parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| StoreError::Backend(format!("创建数据目录失败: {}", e)))?;
            }
        }

        let conn = Connection::open(&expanded).map_err(backend_error)?;
        let store = Self::initialize(conn, expanded)?;
        info!(path = %store.label, "SQLite 存储已打开");
        Ok(store)
    }

    /// 打开内存数据库
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(backend_error)?;
        Self::initialize(conn, ":memory:".to_string())
    }

    fn initialize(conn: Connection, label: String) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(backend_error)?;
        conn.execute_batch(SCHEMA).map_err(backend_error)?;
        migrate_usage_table(&conn).map_err(backend_error)?;
        conn.execute_batch(USAGE_INDEX).map_err(backend_error)?;
        debug!(path = %label, "数据库表初始化完成");

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            label,
        })
    }

    /// 在阻塞线程池上执行，避免占用异步工作线程
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let conn = guard.as_ref().ok_or(StoreError::Closed)?;
            f(conn).map_err(map_sqlite_error)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("数据库任务异常退出: {}", e)))?
    }
}

/// 旧版本的 usage_stats 没有 `api_key_id` 列，补上后历史行归入 0
fn migrate_usage_table(conn: &Connection) -> rusqlite::Result<()> {
    let columns = {
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('usage_stats')")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        names
    };

    if !columns.iter().any(|column| column == "api_key_id") {
        conn.execute_batch(
            "ALTER TABLE usage_stats ADD COLUMN api_key_id INTEGER NOT NULL DEFAULT 0",
        )?;
        info!("usage_stats 已补充 api_key_id 列");
    }
    Ok(())
}

#[async_trait]
impl CacheRepository for SqliteStore {
    async fn touch_fresh(
        &self,
        content_hash: &str,
        source_lang: &str,
        target_lang: &str,
        fresh_after: DateTime<Utc>,
    ) -> StoreResult<Option<CacheEntry>> {
        let sql = format!(
            "UPDATE translation_cache
             SET access_count = access_count + 1
             WHERE text_hash = ?1 AND source_lang = ?2 AND target_lang = ?3 AND created_at > ?4
             RETURNING {CACHE_COLUMNS}"
        );
        let key = (
            content_hash.to_string(),
            source_lang.to_string(),
            target_lang.to_string(),
        );
        let fresh_after = fresh_after.timestamp_millis();
        self.with_conn(move |conn| {
            conn.query_row(
                &sql,
                params![key.0, key.1, key.2, fresh_after],
                cache_entry_from_row,
            )
            .optional()
        })
        .await
    }

    async fn upsert(&self, entry: &CacheEntry) -> StoreResult<()> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO translation_cache
                 (text_hash, source_lang, target_lang, original_text, translated_text, created_at, access_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.content_hash,
                    entry.source_lang,
                    entry.target_lang,
                    entry.original_text,
                    entry.translated_text,
                    entry.created_at.timestamp_millis(),
                    entry.access_count,
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn aggregate(&self) -> StoreResult<CacheAggregate> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(access_count), 0), COALESCE(AVG(access_count), 0.0)
                 FROM translation_cache",
                [],
                |row| {
                    Ok(CacheAggregate {
                        total_entries: row.get(0)?,
                        total_accesses: row.get(1)?,
                        avg_accesses_per_entry: row.get(2)?,
                    })
                },
            )
        })
        .await
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let cutoff = cutoff.timestamp_millis();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM translation_cache WHERE created_at <= ?1",
                params![cutoff],
            )
            .map(|count| count as u64)
        })
        .await
    }
}

#[async_trait]
impl CredentialRepository for SqliteStore {
    async fn insert(&self, credential: &NewCredential) -> StoreResult<Credential> {
        let sql = format!(
            "INSERT INTO api_keys (key, name, description, created_at, is_active, rate_limit, usage_count)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, 0)
             RETURNING {CREDENTIAL_COLUMNS}"
        );
        let credential = credential.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                &sql,
                params![
                    credential.token,
                    credential.name,
                    credential.description,
                    credential.created_at.timestamp_millis(),
                    credential.rate_limit,
                ],
                credential_from_row,
            )
        })
        .await
    }

    async fn touch_active(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Credential>> {
        let sql = format!(
            "UPDATE api_keys
             SET usage_count = usage_count + 1, last_used_at = ?2
             WHERE key = ?1 AND is_active = 1
             RETURNING {CREDENTIAL_COLUMNS}"
        );
        let token = token.to_string();
        let now = now.timestamp_millis();
        self.with_conn(move |conn| {
            conn.query_row(&sql, params![token, now], credential_from_row)
                .optional()
        })
        .await
    }

    async fn list(&self, include_inactive: bool) -> StoreResult<Vec<Credential>> {
        let filter = if include_inactive { "" } else { "WHERE is_active = 1" };
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM api_keys {filter} ORDER BY created_at DESC, id DESC"
        );
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], credential_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn find(&self, id: i64) -> StoreResult<Option<Credential>> {
        let sql = format!("SELECT {CREDENTIAL_COLUMNS} FROM api_keys WHERE id = ?1");
        self.with_conn(move |conn| conn.query_row(&sql, params![id], credential_from_row).optional())
            .await
    }

    async fn update(&self, id: i64, patch: &CredentialPatch) -> StoreResult<bool> {
        let mut assignments: Vec<&'static str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(ref name) = patch.name {
            assignments.push("name = ?");
            values.push(Value::Text(name.clone()));
        }
        if let Some(ref description) = patch.description {
            assignments.push("description = ?");
            values.push(Value::Text(description.clone()));
        }
        if let Some(rate_limit) = patch.rate_limit {
            assignments.push("rate_limit = ?");
            values.push(Value::Integer(rate_limit));
        }

        if assignments.is_empty() {
            return Ok(false);
        }

        values.push(Value::Integer(id));
        let sql = format!("UPDATE api_keys SET {} WHERE id = ?", assignments.join(", "));
        self.with_conn(move |conn| {
            conn.execute(&sql, params_from_iter(values.iter()))
                .map(|changed| changed > 0)
        })
        .await
    }

    async fn set_active(&self, id: i64, active: bool) -> StoreResult<bool> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE api_keys SET is_active = ?1 WHERE id = ?2",
                params![active, id],
            )
            .map(|changed| changed > 0)
        })
        .await
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM api_keys WHERE id = ?1", params![id])
                .map(|changed| changed > 0)
        })
        .await
    }
}

#[async_trait]
impl UsageRepository for SqliteStore {
    async fn append(&self, record: &UsageRecord) -> StoreResult<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO usage_stats (api_key_id, api_key, endpoint, timestamp, response_time, success)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.credential_id,
                    record.credential_name,
                    record.endpoint,
                    record.timestamp.timestamp_millis(),
                    record.response_time_ms,
                    record.success,
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn daily_totals(
        &self,
        credential_id: i64,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<DailyUsage>> {
        let since = since.timestamp_millis();
        let rows: Vec<(String, i64, i64, f64)> = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT date(timestamp / 1000, 'unixepoch') AS day,
                            COUNT(*),
                            SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END),
                            AVG(response_time)
                     FROM usage_stats
                     WHERE api_key_id = ?1 AND timestamp >= ?2
                     GROUP BY day
                     ORDER BY day DESC",
                )?;
                let rows = stmt.query_map(params![credential_id, since], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?;
                rows.collect()
            })
            .await?;

        rows.into_iter()
            .map(|(day, total, successful, avg)| {
                let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                    .map_err(|e| StoreError::Corrupt(format!("无法解析日期 '{}': {}", day, e)))?;
                Ok(DailyUsage {
                    date,
                    total_requests: total,
                    successful_requests: successful,
                    avg_response_time: avg,
                })
            })
            .collect()
    }
}

#[async_trait]
impl StoreLifecycle for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn close(&self) -> StoreResult<()> {
        let conn = self.conn.lock().take();
        match conn {
            Some(conn) => conn.close().map_err(|(_, e)| backend_error(e)),
            None => Ok(()),
        }
    }
}

fn millis_to_datetime(column: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(column, millis))
}

fn credential_from_row(row: &Row<'_>) -> rusqlite::Result<Credential> {
    let last_used_at: Option<i64> = row.get(5)?;
    Ok(Credential {
        id: row.get(0)?,
        token: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: millis_to_datetime(4, row.get(4)?)?,
        last_used_at: last_used_at
            .map(|millis| millis_to_datetime(5, millis))
            .transpose()?,
        active: row.get(6)?,
        rate_limit: row.get(7)?,
        usage_count: row.get(8)?,
    })
}

fn cache_entry_from_row(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    Ok(CacheEntry {
        content_hash: row.get(0)?,
        source_lang: row.get(1)?,
        target_lang: row.get(2)?,
        original_text: row.get(3)?,
        translated_text: row.get(4)?,
        created_at: millis_to_datetime(5, row.get(5)?)?,
        access_count: row.get(6)?,
    })
}

fn backend_error(error: rusqlite::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

fn map_sqlite_error(error: rusqlite::Error) -> StoreError {
    match error {
        rusqlite::Error::SqliteFailure(ref failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(error.to_string())
        }
        rusqlite::Error::IntegralValueOutOfRange(..) | rusqlite::Error::FromSqlConversionFailure(..) => {
            StoreError::Corrupt(error.to_string())
        }
        other => backend_error(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(hash: &str, translated: &str, created_at: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            content_hash: hash.to_string(),
            source_lang: "en".to_string(),
            target_lang: "fr".to_string(),
            original_text: "Hello".to_string(),
            translated_text: translated.to_string(),
            created_at,
            access_count: 1,
        }
    }

    fn new_credential(token: &str, created_at: DateTime<Utc>) -> NewCredential {
        NewCredential {
            token: token.to_string(),
            name: "App".to_string(),
            description: String::new(),
            rate_limit: 1000,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_resets_access_count() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();

        store.upsert(&entry("h1", "Bonjour", now)).await.unwrap();
        store
            .touch_fresh("h1", "en", "fr", now - Duration::hours(1))
            .await
            .unwrap()
            .unwrap();
        store.upsert(&entry("h1", "Salut", now)).await.unwrap();

        let aggregate = store.aggregate().await.unwrap();
        assert_eq!(aggregate.total_entries, 1);
        assert_eq!(aggregate.total_accesses, 1);

        let hit = store
            .touch_fresh("h1", "en", "fr", now - Duration::hours(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.translated_text, "Salut");
        assert_eq!(hit.access_count, 2);
    }

    #[tokio::test]
    async fn test_touch_fresh_ignores_stale_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let created = Utc::now() - Duration::hours(2);
        store.upsert(&entry("h1", "Bonjour", created)).await.unwrap();

        let miss = store
            .touch_fresh("h1", "en", "fr", created + Duration::seconds(1))
            .await
            .unwrap();
        assert!(miss.is_none());

        // 过期条目仍在表中，且访问计数未变
        let aggregate = store.aggregate().await.unwrap();
        assert_eq!(aggregate.total_entries, 1);
        assert_eq!(aggregate.total_accesses, 1);
    }

    #[tokio::test]
    async fn test_empty_aggregate_is_zero() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.aggregate().await.unwrap(), CacheAggregate::default());
    }

    #[tokio::test]
    async fn test_duplicate_token_is_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.insert(&new_credential("ltk_same", now)).await.unwrap();
        let err = store.insert(&new_credential("ltk_same", now)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_partial_update_touches_only_given_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let created = store
            .insert(&new_credential("ltk_a", Utc::now()))
            .await
            .unwrap();

        let patch = CredentialPatch {
            rate_limit: Some(50),
            ..Default::default()
        };
        assert!(store.update(created.id, &patch).await.unwrap());

        let found = store.find(created.id).await.unwrap().unwrap();
        assert_eq!(found.rate_limit, 50);
        assert_eq!(found.name, "App");
        assert!(!store.update(created.id, &CredentialPatch::default()).await.unwrap());
        assert!(!store.update(9999, &patch).await.unwrap());
    }

    fn usage(credential_id: i64, timestamp: DateTime<Utc>) -> UsageRecord {
        UsageRecord {
            credential_id,
            credential_name: "App".to_string(),
            endpoint: "/detect".to_string(),
            timestamp,
            response_time_ms: 10,
            success: true,
        }
    }

    #[tokio::test]
    async fn test_daily_totals_filter_by_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.append(&usage(1, now)).await.unwrap();
        store.append(&usage(1, now)).await.unwrap();
        store.append(&usage(2, now)).await.unwrap();

        let since = now - Duration::days(1);
        assert_eq!(store.daily_totals(1, since).await.unwrap()[0].total_requests, 2);
        assert_eq!(store.daily_totals(2, since).await.unwrap()[0].total_requests, 1);
        assert!(store.daily_totals(3, since).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_usage_table_gains_id_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE usage_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                api_key TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                response_time INTEGER NOT NULL,
                success INTEGER NOT NULL DEFAULT 1
            );
            INSERT INTO usage_stats (api_key, endpoint, timestamp, response_time, success)
            VALUES ('App', '/translate', 1000, 5, 1);",
        )
        .unwrap();

        let store = SqliteStore::initialize(conn, ":memory:".to_string()).unwrap();
        let now = Utc::now();
        store.append(&usage(3, now)).await.unwrap();

        let recent = store.daily_totals(3, now - Duration::days(1)).await.unwrap();
        assert_eq!(recent[0].total_requests, 1);

        // 历史行归入 0
        let epoch = DateTime::from_timestamp_millis(0).unwrap();
        let legacy = store.daily_totals(0, epoch).await.unwrap();
        assert_eq!(legacy.len(), 1);
        assert_eq!(legacy[0].total_requests, 1);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.close().await.unwrap();
        let err = store.aggregate().await.unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }
}
