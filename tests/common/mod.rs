// 集成测试公共模块
//
// 提供内存存储、手动时钟和可计数的假翻译引擎

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use libre_gateway::cache::CacheSettings;
use libre_gateway::error::{GatewayError, GatewayResult};
use libre_gateway::gateway::{Gateway, GatewaySettings, PresentedCredentials};
use libre_gateway::keys::{AdmissionPolicy, ValidatedKey};
use libre_gateway::store::{Credential, DailyUsage, Store, UsageRepository};
use libre_gateway::translator::{
    TranslatedFile, Translator, TranslatorError, TranslatorResult, UploadedFile,
    UpstreamTranslateRequest, UpstreamTranslation,
};
use libre_gateway::utils::ManualClock;

/// 测试用管理员密钥
pub const ADMIN_KEY: &str = "test-admin-secret";

/// 使用次数超过 rate_limit 即拒绝
#[derive(Debug, Default)]
pub struct QuotaPolicy;

#[async_trait]
impl AdmissionPolicy for QuotaPolicy {
    async fn admit(&self, key: &ValidatedKey) -> GatewayResult<()> {
        if key.usage_count > key.rate_limit {
            return Err(GatewayError::QuotaExceeded(format!(
                "密钥 {} 已超过 {} 次配额",
                key.name, key.rate_limit
            )));
        }
        Ok(())
    }
}

/// 记录调用次数的假翻译引擎
#[derive(Debug, Default)]
pub struct FakeTranslator {
    calls: AtomicUsize,
    failing: AtomicBool,
    delay_ms: AtomicUsize,
}

impl FakeTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 上游调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 之后的调用返回 503
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// 每次调用前等待
    pub fn delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    async fn begin_call(&self) -> TranslatorResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TranslatorError::Status {
                status: 503,
                body: "engine unavailable".to_string(),
            });
        }
        Ok(())
    }
}

/// 假翻译结果：`[目标语言] 原文`
pub fn fake_translation(text: &str, target: &str) -> String {
    format!("[{}] {}", target, text)
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(
        &self,
        request: &UpstreamTranslateRequest,
    ) -> TranslatorResult<UpstreamTranslation> {
        self.begin_call().await?;
        Ok(UpstreamTranslation {
            translated_text: fake_translation(&request.text, &request.target),
            detected_language: (request.source == "auto")
                .then(|| json!({ "confidence": 90.0, "language": "en" })),
            alternatives: Vec::new(),
        })
    }

    async fn detect(&self, _text: &str) -> TranslatorResult<Value> {
        self.begin_call().await?;
        Ok(json!([{ "confidence": 90.0, "language": "en" }]))
    }

    async fn languages(&self) -> TranslatorResult<Value> {
        self.begin_call().await?;
        Ok(json!([
            { "code": "en", "name": "English", "targets": ["fr", "de"] },
            { "code": "fr", "name": "French", "targets": ["en"] }
        ]))
    }

    async fn translate_file(
        &self,
        file: &UploadedFile,
        _source: &str,
        target: &str,
    ) -> TranslatorResult<TranslatedFile> {
        self.begin_call().await?;
        let mut bytes = format!("[{}] ", target).into_bytes();
        bytes.extend_from_slice(&file.bytes);
        Ok(TranslatedFile {
            content_type: file.content_type.clone(),
            bytes,
        })
    }
}

/// 组装好的测试网关
pub struct TestGateway {
    pub gateway: Gateway,
    pub store: Store,
    pub translator: Arc<FakeTranslator>,
    pub clock: Arc<ManualClock>,
}

impl TestGateway {
    pub fn admin(&self) -> PresentedCredentials {
        PresentedCredentials::admin(ADMIN_KEY)
    }

    /// 签发一个密钥
    pub async fn issue(&self, name: &str) -> Credential {
        self.gateway
            .create_key(&self.admin(), Some(name), None, None)
            .await
            .expect("create key")
    }

    /// 签发一个密钥并返回其完整令牌
    pub async fn issue_key(&self, name: &str) -> String {
        self.issue(name).await.token
    }

    /// 换用给定的准入策略
    pub fn with_admission(mut self, admission: Arc<dyn AdmissionPolicy>) -> Self {
        self.gateway = self.gateway.with_admission(admission);
        self
    }

    /// 某密钥 id 的全部用量记录（按日汇总）
    pub async fn usage_of(&self, credential_id: i64) -> Vec<DailyUsage> {
        let since = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        self.store
            .usage
            .daily_totals(credential_id, since)
            .await
            .expect("daily totals")
    }

    /// 某密钥 id 的用量记录总数与成功数
    pub async fn usage_counts(&self, credential_id: i64) -> (i64, i64) {
        self.usage_of(credential_id).await.iter().fold((0, 0), |acc, day| {
            (acc.0 + day.total_requests, acc.1 + day.successful_requests)
        })
    }
}

/// 默认测试配置：启用缓存、配置管理员密钥、较短的上游超时
pub fn test_settings() -> GatewaySettings {
    GatewaySettings {
        admin_key: Some(ADMIN_KEY.to_string()),
        text_timeout: Duration::from_secs(2),
        detect_timeout: Duration::from_secs(2),
        file_timeout: Duration::from_secs(2),
        max_upload_bytes: 1024,
        cache: CacheSettings::enabled(),
        ..GatewaySettings::default()
    }
}

pub fn test_gateway() -> TestGateway {
    test_gateway_with(test_settings())
}

pub fn test_gateway_with(settings: GatewaySettings) -> TestGateway {
    let store = Store::in_memory().expect("in-memory store");
    let translator = Arc::new(FakeTranslator::new());
    let clock = Arc::new(ManualClock::starting_now());
    let gateway = Gateway::new(store.clone(), translator.clone(), clock.clone(), settings);

    TestGateway {
        gateway,
        store,
        translator,
        clock,
    }
}
