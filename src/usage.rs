//! 请求用量记录
//!
//! 只追加的用量日志。每个通过认证的请求恰好写入一条记录。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::GatewayResult;
use crate::store::{DailyUsage, UsageRecord, UsageRepository};
use crate::utils::SharedClock;

/// 用量记录器
#[derive(Clone)]
pub struct UsageRecorder {
    repository: Arc<dyn UsageRepository>,
    clock: SharedClock,
}

impl UsageRecorder {
    pub fn new(repository: Arc<dyn UsageRepository>, clock: SharedClock) -> Self {
        Self { repository, clock }
    }

    /// 记录一次已完成的请求，延迟按整毫秒存储
    pub async fn record(
        &self,
        credential_id: i64,
        credential_name: &str,
        endpoint: &str,
        elapsed: Duration,
        success: bool,
    ) -> GatewayResult<()> {
        let record = UsageRecord {
            credential_id,
            credential_name: credential_name.to_string(),
            endpoint: endpoint.to_string(),
            timestamp: self.clock.now(),
            response_time_ms: i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
            success,
        };
        self.repository.append(&record).await?;

        debug!(
            key_id = credential_id,
            key = %credential_name,
            endpoint = %endpoint,
            elapsed_ms = record.response_time_ms,
            success,
            "记录请求用量"
        );
        Ok(())
    }

    /// 某密钥自 `since` 起的每日汇总，最近的日期在前
    pub async fn daily_totals(
        &self,
        credential_id: i64,
        since: DateTime<Utc>,
    ) -> GatewayResult<Vec<DailyUsage>> {
        Ok(self.repository.daily_totals(credential_id, since).await?)
    }
}

impl std::fmt::Debug for UsageRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageRecorder").finish_non_exhaustive()
    }
}
