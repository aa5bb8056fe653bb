//! 网关配置
//!
//! 加载顺序：`.env` 文件 → 配置文件（TOML 或 JSON，按搜索路径查找）→ 环境变量覆盖 → 校验。
//! 所有字段都有默认值，不提供配置文件也能启动。

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheSettings;
use crate::env::{self, EnvError, EnvVar};
use crate::gateway::GatewaySettings;
use crate::store::{StoreBackend, StoreConfig};

/// 配置文件搜索路径
pub const CONFIG_PATHS: &[&str] = &[
    "./libre-gateway.toml",
    "./config/libre-gateway.toml",
    "~/.config/libre-gateway/config.toml",
    "./libre-gateway.json",
];

const ENV_FILES: &[&str] = &[".env.local", ".env.development", ".env.production", ".env"];

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("读取配置文件 {path} 失败: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("解析配置文件 {path} 失败: {message}")]
    Parse { path: String, message: String },

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("配置无效: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// HTTP 服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// 上游翻译引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub file_timeout_secs: u64,
    pub detect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000".to_string(),
            api_key: None,
            timeout_secs: 30,
            file_timeout_secs: 60,
            detect_timeout_secs: 10,
        }
    }
}

/// 缓存配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 3600,
        }
    }
}

/// 安全配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub master_admin_key: Option<String>,
    pub api_key_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            master_admin_key: None,
            api_key_length: crate::keys::DEFAULT_TOKEN_LENGTH,
        }
    }
}

/// 网关完整配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub mode: String,
    pub log_level: String,
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub security: SecurityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: "production".to_string(),
            log_level: "info".to_string(),
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            upstream: UpstreamConfig::default(),
            cache: CacheConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// 完整加载流程；`explicit_path` 优先于搜索路径
    pub fn load(explicit_path: Option<&Path>) -> ConfigResult<Self> {
        Self::load_dotenv();

        let mut config = match explicit_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::find_config_file()?,
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn find_config_file() -> ConfigResult<Self> {
        for path in CONFIG_PATHS {
            let expanded_path = shellexpand::tilde(path);
            let candidate = Path::new(expanded_path.as_ref());
            if candidate.exists() {
                return Self::load_from_file(candidate);
            }
        }

        tracing::info!("未找到配置文件，使用默认配置");
        Ok(Self::default())
    }

    /// 从指定文件加载配置（`.toml` 按 TOML 解析，其他按 JSON）
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let shown = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: shown.clone(),
            source,
        })?;
        tracing::info!("加载配置文件: {}", shown);

        let is_toml = path.extension().map_or(false, |ext| ext == "toml");
        if is_toml {
            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: shown,
                message: e.to_string(),
            })
        } else {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: shown,
                message: e.to_string(),
            })
        }
    }

    /// 加载 .env 文件（只取第一个存在的）
    fn load_dotenv() {
        for env_file in ENV_FILES {
            if Path::new(env_file).exists() && dotenv::from_filename(env_file).is_ok() {
                tracing::info!("已加载环境变量文件: {}", env_file);
                break;
            }
        }
    }

    /// 应用环境变量覆盖，只覆盖已设置的变量
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        use env::{cache, core, security, store, upstream, web};

        if let Some(mode) = core::Mode::lookup() {
            self.mode = mode?;
        }
        if let Some(level) = core::LogLevel::lookup() {
            self.log_level = level?;
        }

        if let Some(address) = web::BindAddress::lookup() {
            self.server.bind_address = address?;
        }
        if let Some(port) = web::Port::lookup() {
            self.server.port = port?;
        }
        if let Some(limit) = web::MaxUploadBytes::lookup() {
            self.server.max_upload_bytes = limit?;
        }

        if let Some(backend) = store::Backend::lookup() {
            self.store.backend = match backend?.as_str() {
                "mongo" => StoreBackend::Mongo,
                _ => StoreBackend::Sqlite,
            };
        }
        if let Some(path) = store::DatabasePath::lookup() {
            self.store.database_path = path?;
        }
        if let Some(url) = store::MongoUrl::lookup() {
            self.store.mongodb_url = url?;
        }
        if let Some(database) = store::MongoDatabase::lookup() {
            self.store.mongodb_database = database?;
        }

        if let Some(url) = upstream::Url::lookup() {
            self.upstream.url = url?;
            tracing::info!("环境变量覆盖引擎地址: {}", self.upstream.url);
        }
        if let Some(api_key) = upstream::ApiKey::lookup() {
            self.upstream.api_key = Some(api_key?).filter(|key| !key.is_empty());
        }
        if let Some(timeout) = upstream::TextTimeout::lookup() {
            self.upstream.timeout_secs = timeout?.as_secs();
        }
        if let Some(timeout) = upstream::FileTimeout::lookup() {
            self.upstream.file_timeout_secs = timeout?.as_secs();
        }
        if let Some(timeout) = upstream::DetectTimeout::lookup() {
            self.upstream.detect_timeout_secs = timeout?.as_secs();
        }

        if let Some(enabled) = cache::Enabled::lookup() {
            self.cache.enabled = enabled?;
        }
        if let Some(ttl) = cache::Ttl::lookup() {
            self.cache.ttl_secs = ttl?.as_secs();
        }

        if let Some(admin_key) = security::MasterAdminKey::lookup() {
            self.security.master_admin_key = Some(admin_key?);
        }
        if let Some(length) = security::ApiKeyLength::lookup() {
            self.security.api_key_length = length?;
        }

        Ok(())
    }

    /// 跨字段校验
    pub fn validate(&self) -> ConfigResult<()> {
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::Invalid("缓存 TTL 必须大于 0".to_string()));
        }
        if self.upstream.timeout_secs == 0
            || self.upstream.file_timeout_secs == 0
            || self.upstream.detect_timeout_secs == 0
        {
            return Err(ConfigError::Invalid("上游超时必须大于 0".to_string()));
        }
        if self.security.api_key_length < 16 {
            return Err(ConfigError::Invalid("API 密钥长度不能小于 16".to_string()));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("上传大小上限必须大于 0".to_string()));
        }
        if url::Url::parse(&self.upstream.url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "无效的引擎地址: {}",
                self.upstream.url
            )));
        }
        if self.store.backend == StoreBackend::Sqlite && self.store.database_path.trim().is_empty() {
            return Err(ConfigError::Invalid("数据库路径不能为空".to_string()));
        }
        Ok(())
    }

    /// 监听地址
    pub fn socket_addr(&self) -> ConfigResult<SocketAddr> {
        format!("{}:{}", self.server.bind_address, self.server.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("无效的监听地址: {}", e)))
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            enabled: self.cache.enabled,
            ttl: Duration::from_secs(self.cache.ttl_secs),
        }
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            admin_key: self.security.master_admin_key.clone(),
            text_timeout: Duration::from_secs(self.upstream.timeout_secs),
            detect_timeout: Duration::from_secs(self.upstream.detect_timeout_secs),
            file_timeout: Duration::from_secs(self.upstream.file_timeout_secs),
            max_upload_bytes: self.server.max_upload_bytes,
            cache: self.cache_settings(),
            token_length: self.security.api_key_length,
        }
    }

    pub fn is_development(&self) -> bool {
        self.mode == "development"
    }

    /// 生成示例配置文件
    pub fn generate_example_config(path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(&Self::default()).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.socket_addr().unwrap().port(), 3000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[cache]\nttl_secs = 120\n\n[upstream]\nurl = \"http://engine:5000\"").unwrap();

        let config = GatewayConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.cache.ttl_secs, 120);
        assert!(!config.cache.enabled);
        assert_eq!(config.upstream.url, "http://engine:5000");
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_json_config() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"store": {{"backend": "mongo"}}, "security": {{"api_key_length": 48}}}}"#).unwrap();

        let config = GatewayConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Mongo);
        assert_eq!(config.security.api_key_length, 48);
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut config = GatewayConfig::default();
        config.cache.ttl_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_settings_conversion() {
        let mut config = GatewayConfig::default();
        config.security.master_admin_key = Some("admin-secret".to_string());
        config.upstream.timeout_secs = 5;

        let settings = config.gateway_settings();
        assert_eq!(settings.admin_key.as_deref(), Some("admin-secret"));
        assert_eq!(settings.text_timeout, Duration::from_secs(5));
        assert_eq!(config.cache_settings(), CacheSettings::default());
    }

    #[test]
    fn test_example_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("example.toml");
        GatewayConfig::generate_example_config(&path).unwrap();
        let loaded = GatewayConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, GatewayConfig::default());
    }
}
