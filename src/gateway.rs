//! # 网关编排器
//!
//! 组合缓存、密钥注册表、用量记录器和翻译引擎，完成一次请求的完整流程：
//!
//! 1. 认证：管理员密钥（常量时间比较）或 API 密钥校验
//! 2. 参数校验
//! 3. 缓存查找，命中即返回
//! 4. 在限定时间内调用上游引擎，成功后写入缓存
//!
//! 通过认证的 translate / detect / translate_file 请求无论成败都恰好写入一条用量记录；
//! 认证前被拒绝的请求不计量。

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheSettings, CacheStore};
use crate::error::{helpers, GatewayError, GatewayResult};
use crate::keys::{
    AdmissionPolicy, KeyRegistry, KeyStats, Unrestricted, ValidatedKey, DEFAULT_TOKEN_LENGTH,
};
use crate::store::{CacheAggregate, Credential, CredentialPatch, Store};
use crate::translator::{
    TranslatedFile, Translator, TranslatorResult, UploadedFile, UpstreamTranslateRequest,
};
use crate::usage::UsageRecorder;
use crate::utils::SharedClock;

/// 管理员调用的计量名称
pub const ADMIN_CALLER_NAME: &str = "admin";

/// 管理员调用的计量 id，自增主键从 1 开始，不会与真实密钥冲突
pub const ADMIN_CALLER_ID: i64 = 0;

/// 未指定源语言时使用自动检测
pub const AUTO_SOURCE: &str = "auto";

/// 计量端点名称
pub mod endpoints {
    pub const TRANSLATE: &str = "/translate";
    pub const DETECT: &str = "/detect";
    pub const FILE_TRANSLATE: &str = "/files/translate";
}

/// 允许上传的文件类型
pub const ALLOWED_FILE_TYPES: &[&str] = &[
    "text/plain",
    "text/html",
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.oasis.opendocument.text",
];

/// 编排器配置
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    /// 主管理员密钥，未配置时禁用管理员通道
    pub admin_key: Option<String>,
    pub text_timeout: Duration,
    pub detect_timeout: Duration,
    pub file_timeout: Duration,
    pub max_upload_bytes: usize,
    pub cache: CacheSettings,
    /// 新令牌随机部分长度
    pub token_length: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            admin_key: None,
            text_timeout: Duration::from_secs(30),
            detect_timeout: Duration::from_secs(10),
            file_timeout: Duration::from_secs(60),
            max_upload_bytes: 10 * 1024 * 1024,
            cache: CacheSettings::default(),
            token_length: DEFAULT_TOKEN_LENGTH,
        }
    }
}

/// 请求携带的凭证
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresentedCredentials {
    pub admin_key: Option<String>,
    pub api_key: Option<String>,
}

impl PresentedCredentials {
    pub fn api_key(token: impl Into<String>) -> Self {
        Self {
            admin_key: None,
            api_key: Some(token.into()),
        }
    }

    pub fn admin(secret: impl Into<String>) -> Self {
        Self {
            admin_key: Some(secret.into()),
            api_key: None,
        }
    }

    /// 尚未携带 API 密钥时使用请求体中的密钥
    pub fn or_api_key(mut self, fallback: Option<String>) -> Self {
        if self.api_key.is_none() {
            self.api_key = fallback
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty());
        }
        self
    }
}

/// 认证后的调用方
#[derive(Debug, Clone, PartialEq)]
pub enum Caller {
    Admin,
    Key(ValidatedKey),
}

impl Caller {
    /// 用量记录中使用的名称
    pub fn name(&self) -> &str {
        match self {
            Caller::Admin => ADMIN_CALLER_NAME,
            Caller::Key(key) => &key.name,
        }
    }

    /// 用量聚合所依据的 id
    pub fn id(&self) -> i64 {
        match self {
            Caller::Admin => ADMIN_CALLER_ID,
            Caller::Key(key) => key.id,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Caller::Admin)
    }
}

/// 文本翻译请求
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TranslateRequest {
    #[serde(rename = "q")]
    pub text: Option<String>,
    pub source: Option<String>,
    pub target: Option<String>,
    pub format: Option<String>,
    pub alternatives: Option<u32>,
}

impl TranslateRequest {
    pub fn new(text: &str, source: &str, target: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            source: Some(source.to_string()),
            target: Some(target.to_string()),
            ..Self::default()
        }
    }
}

/// 文本翻译结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateOutcome {
    pub translated_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_language: Option<Value>,
    pub alternatives: Vec<String>,
    pub from_cache: bool,
}

/// 文件翻译请求
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileTranslateRequest {
    pub file: Option<UploadedFile>,
    pub source: Option<String>,
    pub target: Option<String>,
}

/// 文件翻译结果
#[derive(Debug, Clone, PartialEq)]
pub struct FileTranslateOutcome {
    /// `translated_<原文件名>`
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// 网关编排器
#[derive(Clone)]
pub struct Gateway {
    store: Store,
    cache: CacheStore,
    keys: KeyRegistry,
    usage: UsageRecorder,
    translator: Arc<dyn Translator>,
    admission: Arc<dyn AdmissionPolicy>,
    settings: GatewaySettings,
}

impl Gateway {
    /// 以打开的存储组装各组件
    pub fn new(
        store: Store,
        translator: Arc<dyn Translator>,
        clock: SharedClock,
        settings: GatewaySettings,
    ) -> Self {
        if settings.admin_key.is_none() {
            warn!("未配置 MASTER_ADMIN_KEY，管理员接口不可用");
        }

        let cache = CacheStore::new(store.cache.clone(), clock.clone(), settings.cache.clone());
        let usage = UsageRecorder::new(store.usage.clone(), clock.clone());
        let keys = KeyRegistry::new(
            store.credentials.clone(),
            usage.clone(),
            clock,
            settings.token_length,
        );

        Self {
            store,
            cache,
            keys,
            usage,
            translator,
            admission: Arc::new(Unrestricted),
            settings,
        }
    }

    /// 替换准入策略
    pub fn with_admission(mut self, admission: Arc<dyn AdmissionPolicy>) -> Self {
        self.admission = admission;
        self
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn keys(&self) -> &KeyRegistry {
        &self.keys
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.backend_name()
    }

    /// 关闭底层存储
    pub async fn shutdown(&self) -> GatewayResult<()> {
        Ok(self.store.close().await?)
    }

    // ========== 认证 ==========

    /// 认证调用方：先检查管理员密钥，再校验 API 密钥
    pub async fn authenticate(&self, credentials: &PresentedCredentials) -> GatewayResult<Caller> {
        if self.is_admin(credentials) {
            return Ok(Caller::Admin);
        }

        let token = match credentials.api_key.as_deref() {
            Some(token) if !token.is_empty() => token,
            _ => return Err(GatewayError::Unauthenticated),
        };

        let key = self
            .keys
            .validate(token)
            .await?
            .ok_or(GatewayError::InvalidCredential)?;
        self.admission.admit(&key).await?;

        debug!(key = %key.name, usage = key.usage_count, "API 密钥校验通过");
        Ok(Caller::Key(key))
    }

    /// 仅允许管理员
    pub fn require_admin(&self, credentials: &PresentedCredentials) -> GatewayResult<()> {
        if self.is_admin(credentials) {
            Ok(())
        } else {
            Err(GatewayError::AdminRequired)
        }
    }

    fn is_admin(&self, credentials: &PresentedCredentials) -> bool {
        match (&self.settings.admin_key, &credentials.admin_key) {
            (Some(expected), Some(presented)) if !expected.is_empty() => {
                constant_time_eq(expected.as_bytes(), presented.as_bytes())
            }
            _ => false,
        }
    }

    // ========== 翻译流程 ==========

    /// 文本翻译
    pub async fn translate(
        &self,
        credentials: &PresentedCredentials,
        request: TranslateRequest,
    ) -> GatewayResult<TranslateOutcome> {
        let caller = self.authenticate(credentials).await?;
        self.metered(&caller, endpoints::TRANSLATE, self.translate_text(request))
            .await
    }

    async fn translate_text(&self, request: TranslateRequest) -> GatewayResult<TranslateOutcome> {
        let text = required(request.text, "q")?;
        let target = required(request.target, "target")?;
        let source = request
            .source
            .filter(|source| !source.is_empty())
            .unwrap_or_else(|| AUTO_SOURCE.to_string());

        if let Some(hit) = self.cache.get(&text, &source, &target).await? {
            return Ok(TranslateOutcome {
                translated_text: hit.translated_text,
                detected_language: None,
                alternatives: Vec::new(),
                from_cache: true,
            });
        }

        let upstream_request = UpstreamTranslateRequest {
            text,
            source,
            target,
            format: request.format.unwrap_or_else(|| "text".to_string()),
            alternatives: request.alternatives.unwrap_or(0),
        };
        let translation = self
            .call_upstream(
                self.settings.text_timeout,
                self.translator.translate(&upstream_request),
            )
            .await?;

        self.cache
            .put(
                &upstream_request.text,
                &upstream_request.source,
                &upstream_request.target,
                &translation.translated_text,
            )
            .await?;

        Ok(TranslateOutcome {
            translated_text: translation.translated_text,
            detected_language: translation.detected_language,
            alternatives: translation.alternatives,
            from_cache: false,
        })
    }

    /// 语言检测
    pub async fn detect(
        &self,
        credentials: &PresentedCredentials,
        text: Option<String>,
    ) -> GatewayResult<Value> {
        let caller = self.authenticate(credentials).await?;
        self.metered(&caller, endpoints::DETECT, async {
            let text = required(text, "q")?;
            self.call_upstream(self.settings.detect_timeout, self.translator.detect(&text))
                .await
        })
        .await
    }

    /// 支持的语言列表（无需认证，不计量）
    pub async fn languages(&self) -> GatewayResult<Value> {
        self.call_upstream(self.settings.detect_timeout, self.translator.languages())
            .await
    }

    /// 文件翻译（不经过缓存）
    pub async fn translate_file(
        &self,
        credentials: &PresentedCredentials,
        request: FileTranslateRequest,
    ) -> GatewayResult<FileTranslateOutcome> {
        self.translate_upload(credentials, Ok(request)).await
    }

    /// 文件翻译，接受可能解析失败的上传
    ///
    /// 先认证再查看解析结果：无凭证返回 401，凭证有效时解析错误也计入用量。
    pub async fn translate_upload(
        &self,
        credentials: &PresentedCredentials,
        upload: GatewayResult<FileTranslateRequest>,
    ) -> GatewayResult<FileTranslateOutcome> {
        let caller = self.authenticate(credentials).await?;
        self.metered(&caller, endpoints::FILE_TRANSLATE, async {
            let request = upload?;
            let file = request
                .file
                .ok_or_else(|| helpers::missing_parameter("file"))?;
            self.check_upload(&file)?;
            let target = required(request.target, "target")?;
            let source = request
                .source
                .filter(|source| !source.is_empty())
                .unwrap_or_else(|| AUTO_SOURCE.to_string());

            let translated: TranslatedFile = self
                .call_upstream(
                    self.settings.file_timeout,
                    self.translator.translate_file(&file, &source, &target),
                )
                .await?;

            Ok(FileTranslateOutcome {
                file_name: format!("translated_{}", file.file_name),
                content_type: translated.content_type,
                bytes: translated.bytes,
            })
        })
        .await
    }

    /// 检查上传文件的大小与类型
    pub fn check_upload(&self, file: &UploadedFile) -> GatewayResult<()> {
        if file.bytes.len() > self.settings.max_upload_bytes {
            return Err(GatewayError::PayloadTooLarge {
                limit: self.settings.max_upload_bytes,
            });
        }
        let essence = file
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !ALLOWED_FILE_TYPES.contains(&essence.as_str()) {
            return Err(GatewayError::UnsupportedFileType(file.content_type.clone()));
        }
        Ok(())
    }

    // ========== 缓存管理 ==========

    pub async fn cache_stats(&self, credentials: &PresentedCredentials) -> GatewayResult<CacheAggregate> {
        self.authenticate(credentials).await?;
        self.cache.stats().await
    }

    pub async fn purge_cache(&self, credentials: &PresentedCredentials) -> GatewayResult<u64> {
        self.authenticate(credentials).await?;
        self.cache.purge_expired().await
    }

    // ========== 密钥管理（仅管理员） ==========

    pub async fn create_key(
        &self,
        credentials: &PresentedCredentials,
        name: Option<&str>,
        description: Option<&str>,
        rate_limit: Option<i64>,
    ) -> GatewayResult<Credential> {
        self.require_admin(credentials)?;
        let name = name.ok_or_else(|| helpers::missing_parameter("name"))?;
        self.keys.create(name, description, rate_limit).await
    }

    pub async fn list_keys(
        &self,
        credentials: &PresentedCredentials,
        include_inactive: bool,
    ) -> GatewayResult<Vec<Credential>> {
        self.require_admin(credentials)?;
        self.keys.list(include_inactive).await
    }

    pub async fn get_key(&self, credentials: &PresentedCredentials, id: i64) -> GatewayResult<Credential> {
        self.require_admin(credentials)?;
        self.keys.get(id).await?.ok_or_else(|| key_not_found(id))
    }

    pub async fn update_key(
        &self,
        credentials: &PresentedCredentials,
        id: i64,
        patch: &CredentialPatch,
    ) -> GatewayResult<()> {
        self.require_admin(credentials)?;
        found_or_not_found(self.keys.update(id, patch).await?, id)
    }

    pub async fn revoke_key(&self, credentials: &PresentedCredentials, id: i64) -> GatewayResult<()> {
        self.require_admin(credentials)?;
        found_or_not_found(self.keys.revoke(id).await?, id)
    }

    pub async fn reactivate_key(&self, credentials: &PresentedCredentials, id: i64) -> GatewayResult<()> {
        self.require_admin(credentials)?;
        found_or_not_found(self.keys.reactivate(id).await?, id)
    }

    pub async fn delete_key(&self, credentials: &PresentedCredentials, id: i64) -> GatewayResult<()> {
        self.require_admin(credentials)?;
        found_or_not_found(self.keys.delete(id).await?, id)
    }

    pub async fn key_stats(&self, credentials: &PresentedCredentials, id: i64) -> GatewayResult<KeyStats> {
        self.require_admin(credentials)?;
        self.keys.get_stats(id).await?.ok_or_else(|| key_not_found(id))
    }

    // ========== 内部 ==========

    /// 执行一次计量请求：无论成败都写入一条用量记录
    async fn metered<T, F>(&self, caller: &Caller, endpoint: &'static str, work: F) -> GatewayResult<T>
    where
        F: Future<Output = GatewayResult<T>>,
    {
        let started = Instant::now();
        let result = work.await;
        let success = result.is_ok();

        metrics::counter!(
            "gateway_requests_total",
            "endpoint" => endpoint,
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);

        let recorded = self
            .usage
            .record(caller.id(), caller.name(), endpoint, started.elapsed(), success)
            .await;

        // 请求本身的错误由调用方记录日志
        match (result, recorded) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(record_error)) => Err(record_error),
            (Err(error), recorded) => {
                if let Err(record_error) = recorded {
                    helpers::log_error(&record_error);
                }
                Err(error)
            }
        }
    }

    /// 在给定时限内调用上游，超时视为失败，不重试
    async fn call_upstream<T, F>(&self, budget: Duration, call: F) -> GatewayResult<T>
    where
        F: Future<Output = TranslatorResult<T>>,
    {
        match tokio::time::timeout(budget, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => {
                metrics::counter!("gateway_upstream_failures_total", "reason" => "error").increment(1);
                Err(error.into())
            }
            Err(elapsed) => {
                metrics::counter!("gateway_upstream_failures_total", "reason" => "timeout").increment(1);
                warn!("上游调用超过 {:?} 时限", budget);
                Err(elapsed.into())
            }
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("store", &self.store)
            .field("cache", &self.cache)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

fn required(value: Option<String>, name: &str) -> GatewayResult<String> {
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| helpers::missing_parameter(name))
}

fn key_not_found(id: i64) -> GatewayError {
    helpers::not_found(format!("API 密钥 {} 不存在", id))
}

fn found_or_not_found(found: bool, id: i64) -> GatewayResult<()> {
    if found {
        Ok(())
    } else {
        Err(key_not_found(id))
    }
}

/// 常量时间比较，避免通过响应时间泄露密钥前缀
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (left, right) in a.iter().zip(b.iter()) {
        diff |= left ^ right;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret-longer"));
    }

    #[test]
    fn test_caller_name_and_id() {
        assert_eq!(Caller::Admin.name(), ADMIN_CALLER_NAME);
        assert_eq!(Caller::Admin.id(), ADMIN_CALLER_ID);
        let key = Caller::Key(ValidatedKey {
            id: 7,
            name: "App".to_string(),
            rate_limit: 10,
            usage_count: 1,
        });
        assert_eq!(key.name(), "App");
        assert_eq!(key.id(), 7);
    }

    #[test]
    fn test_body_key_is_lowest_priority() {
        let from_header = PresentedCredentials::api_key("ltk_header").or_api_key(Some("ltk_body".into()));
        assert_eq!(from_header.api_key.as_deref(), Some("ltk_header"));

        let from_body = PresentedCredentials::default().or_api_key(Some(" ltk_body ".into()));
        assert_eq!(from_body.api_key.as_deref(), Some("ltk_body"));

        let blank = PresentedCredentials::default().or_api_key(Some("  ".into()));
        assert!(blank.api_key.is_none());
    }

    #[test]
    fn test_required_rejects_empty() {
        assert!(required(None, "q").is_err());
        assert!(required(Some(String::new()), "q").is_err());
        assert_eq!(required(Some("x".to_string()), "q").unwrap(), "x");
    }

    #[test]
    fn test_translate_request_uses_q_field() {
        let request: TranslateRequest =
            serde_json::from_str(r#"{"q":"Hello","target":"fr"}"#).unwrap();
        assert_eq!(request.text.as_deref(), Some("Hello"));
        assert!(request.source.is_none());
    }
}
