//! 翻译结果缓存
//!
//! 以 (内容哈希, 源语言, 目标语言) 为键的持久化缓存。过期是惰性的：
//! 读取时跳过过期条目但不删除，只有 `purge_expired` 会缩小表。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::GatewayResult;
use crate::store::{CacheAggregate, CacheEntry, CacheRepository};
use crate::utils::{content_hash, SharedClock};

/// 缓存命中结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResult {
    pub translated_text: String,
    pub from_cache: bool,
    pub access_count: i64,
}

/// 缓存配置
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
}

/// 默认关闭，需显式启用
impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: Duration::from_secs(3600),
        }
    }
}

impl CacheSettings {
    /// 启用并使用默认 TTL
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }
}

/// 翻译缓存
#[derive(Clone)]
pub struct CacheStore {
    repository: Arc<dyn CacheRepository>,
    clock: SharedClock,
    settings: CacheSettings,
}

impl CacheStore {
    pub fn new(repository: Arc<dyn CacheRepository>, clock: SharedClock, settings: CacheSettings) -> Self {
        info!(
            enabled = settings.enabled,
            ttl_secs = settings.ttl.as_secs(),
            "翻译缓存已初始化"
        );
        Self {
            repository,
            clock,
            settings,
        }
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.settings.ttl
    }

    /// 查找未过期的条目，命中时递增访问计数
    pub async fn get(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> GatewayResult<Option<CachedResult>> {
        if !self.settings.enabled {
            return Ok(None);
        }

        let hash = content_hash(text);
        let fresh_after = self.freshness_cutoff();
        let entry = self
            .repository
            .touch_fresh(&hash, source_lang, target_lang, fresh_after)
            .await?;

        match entry {
            Some(entry) => {
                metrics::counter!("gateway_cache_hits_total").increment(1);
                debug!(source = %source_lang, target = %target_lang, "缓存命中");
                Ok(Some(CachedResult {
                    translated_text: entry.translated_text,
                    from_cache: true,
                    access_count: entry.access_count,
                }))
            }
            None => {
                metrics::counter!("gateway_cache_misses_total").increment(1);
                Ok(None)
            }
        }
    }

    /// 写入或替换条目（后写者胜），重置创建时间与访问计数
    pub async fn put(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        translated_text: &str,
    ) -> GatewayResult<()> {
        if !self.settings.enabled {
            return Ok(());
        }

        let entry = CacheEntry {
            content_hash: content_hash(text),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            original_text: text.to_string(),
            translated_text: translated_text.to_string(),
            created_at: self.clock.now(),
            access_count: 1,
        };
        self.repository.upsert(&entry).await?;
        debug!(source = %source_lang, target = %target_lang, "写入缓存");
        Ok(())
    }

    pub async fn stats(&self) -> GatewayResult<CacheAggregate> {
        Ok(self.repository.aggregate().await?)
    }

    /// 删除所有已过期条目，返回删除数量
    pub async fn purge_expired(&self) -> GatewayResult<u64> {
        let cutoff = self.freshness_cutoff();
        let removed = self.repository.delete_created_before(cutoff).await?;
        metrics::counter!("gateway_cache_purged_total").increment(removed);
        info!("清理过期缓存 {} 条", removed);
        Ok(removed)
    }

    /// 早于或等于此时刻创建的条目视为过期
    fn freshness_cutoff(&self) -> chrono::DateTime<chrono::Utc> {
        let ttl = chrono::Duration::from_std(self.settings.ttl).unwrap_or(chrono::Duration::MAX);
        self.clock
            .now()
            .checked_sub_signed(ttl)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::utils::ManualClock;

    fn cache_with(settings: CacheSettings) -> (CacheStore, Arc<ManualClock>) {
        let store = Store::in_memory().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        (CacheStore::new(store.cache, clock.clone(), settings), clock)
    }

    #[tokio::test]
    async fn test_hit_increments_access_count() {
        let (cache, _) = cache_with(CacheSettings::enabled());
        cache.put("Hello", "en", "fr", "Bonjour").await.unwrap();

        let first = cache.get("Hello", "en", "fr").await.unwrap().unwrap();
        assert_eq!(first.translated_text, "Bonjour");
        assert!(first.from_cache);
        assert_eq!(first.access_count, 2);

        let second = cache.get("Hello", "en", "fr").await.unwrap().unwrap();
        assert_eq!(second.access_count, 3);
    }

    #[tokio::test]
    async fn test_language_pair_is_part_of_key() {
        let (cache, _) = cache_with(CacheSettings::enabled());
        cache.put("Hello", "en", "fr", "Bonjour").await.unwrap();

        assert!(cache.get("Hello", "en", "de").await.unwrap().is_none());
        assert!(cache.get("Hello", "auto", "fr").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entry_expires_at_ttl_boundary() {
        let (cache, clock) = cache_with(CacheSettings {
            enabled: true,
            ttl: Duration::from_secs(60),
        });
        cache.put("Hello", "en", "fr", "Bonjour").await.unwrap();

        clock.advance(chrono::Duration::seconds(59));
        assert!(cache.get("Hello", "en", "fr").await.unwrap().is_some());

        clock.advance(chrono::Duration::seconds(1));
        assert!(cache.get("Hello", "en", "fr").await.unwrap().is_none());

        // 惰性过期：行仍然存在
        assert_eq!(cache.stats().await.unwrap().total_entries, 1);
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.stats().await.unwrap().total_entries, 0);
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let (cache, _) = cache_with(CacheSettings {
            enabled: false,
            ttl: Duration::from_secs(60),
        });
        cache.put("Hello", "en", "fr", "Bonjour").await.unwrap();

        assert!(cache.get("Hello", "en", "fr").await.unwrap().is_none());
        assert_eq!(cache.stats().await.unwrap().total_entries, 0);
    }

    #[tokio::test]
    async fn test_stats_average() {
        let (cache, _) = cache_with(CacheSettings::enabled());
        cache.put("one", "en", "fr", "un").await.unwrap();
        cache.put("two", "en", "fr", "deux").await.unwrap();
        cache.get("one", "en", "fr").await.unwrap();
        cache.get("one", "en", "fr").await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_accesses, 4);
        assert!((stats.avg_accesses_per_entry - 2.0).abs() < f64::EPSILON);
    }
}
