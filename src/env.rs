//! 统一的环境变量管理系统
//!
//! 每个变量是一个实现 [`EnvVar`] 的类型，携带名称、默认值、说明和解析规则，
//! 按关注点分组。配置文件加载后由 [`crate::config::GatewayConfig::apply_env_overrides`]
//! 用这里的变量覆盖。

use std::env;
use std::fmt;
use std::time::Duration;

/// 环境变量解析错误
#[derive(Debug, Clone)]
pub struct EnvError {
    pub variable: String,
    pub message: String,
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment variable '{}': {}", self.variable, self.message)
    }
}

impl std::error::Error for EnvError {}

pub type EnvResult<T> = Result<T, EnvError>;

/// 环境变量访问器特性
pub trait EnvVar<T> {
    const NAME: &'static str;
    const DEFAULT: Option<T>;
    const DESCRIPTION: &'static str;

    fn parse(value: &str) -> EnvResult<T>;

    /// 未设置时使用的值
    fn fallback() -> Option<T> {
        Self::DEFAULT
    }

    /// 仅在变量已设置时返回解析结果
    fn lookup() -> Option<EnvResult<T>> {
        env::var(Self::NAME).ok().map(|value| Self::parse(&value))
    }

    fn get() -> EnvResult<T> {
        match Self::lookup() {
            Some(parsed) => parsed,
            None => Self::fallback().ok_or_else(|| EnvError {
                variable: Self::NAME.to_string(),
                message: "Required environment variable not set".to_string(),
            }),
        }
    }
}

/// 核心环境变量定义
pub mod core {
    use super::*;

    /// 应用运行模式
    pub struct Mode;
    impl EnvVar<String> for Mode {
        const NAME: &'static str = "GATEWAY_MODE";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Application mode: development, production";

        fn fallback() -> Option<String> {
            Some("production".to_string())
        }

        fn parse(value: &str) -> EnvResult<String> {
            match value.to_lowercase().as_str() {
                "development" | "dev" => Ok("development".to_string()),
                "production" | "prod" => Ok("production".to_string()),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!("Invalid mode '{}'. Use: development, production", value),
                }),
            }
        }
    }

    /// 日志级别
    pub struct LogLevel;
    impl EnvVar<String> for LogLevel {
        const NAME: &'static str = "GATEWAY_LOG_LEVEL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Log level: trace, debug, info, warn, error";

        fn fallback() -> Option<String> {
            Some("info".to_string())
        }

        fn parse(value: &str) -> EnvResult<String> {
            match value.to_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => Ok(value.to_lowercase()),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!(
                        "Invalid log level '{}'. Use: trace, debug, info, warn, error",
                        value
                    ),
                }),
            }
        }
    }
}

/// Web 服务器相关环境变量
pub mod web {
    use super::*;

    /// 绑定地址
    pub struct BindAddress;
    impl EnvVar<String> for BindAddress {
        const NAME: &'static str = "GATEWAY_BIND_ADDRESS";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Web server bind address";

        fn fallback() -> Option<String> {
            Some("0.0.0.0".to_string())
        }

        fn parse(value: &str) -> EnvResult<String> {
            let addr = value.trim();
            if addr.is_empty() {
                return Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "Address cannot be empty".to_string(),
                });
            }
            Ok(addr.to_string())
        }
    }

    /// 端口
    pub struct Port;
    impl EnvVar<u16> for Port {
        const NAME: &'static str = "PORT";
        const DEFAULT: Option<u16> = Some(3000);
        const DESCRIPTION: &'static str = "Web server port";

        fn parse(value: &str) -> EnvResult<u16> {
            match value.trim().parse::<u16>() {
                Ok(port) if port > 0 => Ok(port),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "Must be a valid port number (1-65535)".to_string(),
                }),
            }
        }
    }

    /// 上传文件大小上限
    pub struct MaxUploadBytes;
    impl EnvVar<usize> for MaxUploadBytes {
        const NAME: &'static str = "MAX_UPLOAD_BYTES";
        const DEFAULT: Option<usize> = Some(10 * 1024 * 1024);
        const DESCRIPTION: &'static str = "Maximum uploaded file size in bytes";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 1024, 512 * 1024 * 1024)
        }
    }
}

/// 持久化存储相关环境变量
pub mod store {
    use super::*;

    /// 存储后端
    pub struct Backend;
    impl EnvVar<String> for Backend {
        const NAME: &'static str = "GATEWAY_STORE_BACKEND";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Persistent store backend: sqlite, mongo";

        fn fallback() -> Option<String> {
            Some("sqlite".to_string())
        }

        fn parse(value: &str) -> EnvResult<String> {
            match value.trim().to_lowercase().as_str() {
                "sqlite" => Ok("sqlite".to_string()),
                "mongo" | "mongodb" => Ok("mongo".to_string()),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!("Invalid backend '{}'. Use: sqlite, mongo", value),
                }),
            }
        }
    }

    /// SQLite 数据库路径
    pub struct DatabasePath;
    impl EnvVar<String> for DatabasePath {
        const NAME: &'static str = "DATABASE_PATH";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "SQLite database file (':memory:' for a transient store)";

        fn fallback() -> Option<String> {
            Some("./data/gateway.db".to_string())
        }

        fn parse(value: &str) -> EnvResult<String> {
            parse_non_empty(value, Self::NAME)
        }
    }

    /// MongoDB 连接字符串
    pub struct MongoUrl;
    impl EnvVar<String> for MongoUrl {
        const NAME: &'static str = "MONGODB_URL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "MongoDB connection string";

        fn fallback() -> Option<String> {
            Some("mongodb://localhost:27017".to_string())
        }

        fn parse(value: &str) -> EnvResult<String> {
            let url = value.trim();
            if !url.starts_with("mongodb://") && !url.starts_with("mongodb+srv://") {
                return Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "Must start with mongodb:// or mongodb+srv://".to_string(),
                });
            }
            Ok(url.to_string())
        }
    }

    /// MongoDB 数据库名称
    pub struct MongoDatabase;
    impl EnvVar<String> for MongoDatabase {
        const NAME: &'static str = "MONGODB_DATABASE";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "MongoDB database name";

        fn fallback() -> Option<String> {
            Some("libre_gateway".to_string())
        }

        fn parse(value: &str) -> EnvResult<String> {
            parse_non_empty(value, Self::NAME)
        }
    }
}

/// 上游翻译引擎相关环境变量
pub mod upstream {
    use super::*;

    /// 引擎地址
    pub struct Url;
    impl EnvVar<String> for Url {
        const NAME: &'static str = "LIBRETRANSLATE_URL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Base URL of the LibreTranslate engine";

        fn fallback() -> Option<String> {
            Some("http://localhost:5000".to_string())
        }

        fn parse(value: &str) -> EnvResult<String> {
            let parsed = url::Url::parse(value.trim()).map_err(|e| EnvError {
                variable: Self::NAME.to_string(),
                message: format!("Invalid URL: {}", e),
            })?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "URL must use http or https".to_string(),
                });
            }
            Ok(value.trim().to_string())
        }
    }

    /// 引擎 API 密钥
    pub struct ApiKey;
    impl EnvVar<String> for ApiKey {
        const NAME: &'static str = "LIBRETRANSLATE_API_KEY";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "API key forwarded to the engine (optional)";

        fn parse(value: &str) -> EnvResult<String> {
            Ok(value.trim().to_string())
        }
    }

    /// 文本翻译超时
    pub struct TextTimeout;
    impl EnvVar<Duration> for TextTimeout {
        const NAME: &'static str = "UPSTREAM_TIMEOUT_SECONDS";
        const DEFAULT: Option<Duration> = Some(Duration::from_secs(30));
        const DESCRIPTION: &'static str = "Timeout for text translation calls in seconds";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_seconds(value, Self::NAME, 1, 600)
        }
    }

    /// 文件翻译超时
    pub struct FileTimeout;
    impl EnvVar<Duration> for FileTimeout {
        const NAME: &'static str = "UPSTREAM_FILE_TIMEOUT_SECONDS";
        const DEFAULT: Option<Duration> = Some(Duration::from_secs(60));
        const DESCRIPTION: &'static str = "Timeout for file translation calls in seconds";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_seconds(value, Self::NAME, 1, 3600)
        }
    }

    /// 语言检测超时
    pub struct DetectTimeout;
    impl EnvVar<Duration> for DetectTimeout {
        const NAME: &'static str = "UPSTREAM_DETECT_TIMEOUT_SECONDS";
        const DEFAULT: Option<Duration> = Some(Duration::from_secs(10));
        const DESCRIPTION: &'static str = "Timeout for language detection and listing in seconds";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_seconds(value, Self::NAME, 1, 600)
        }
    }
}

/// 缓存相关环境变量
pub mod cache {
    use super::*;

    /// 缓存启用状态
    pub struct Enabled;
    impl EnvVar<bool> for Enabled {
        const NAME: &'static str = "CACHE_ENABLED";
        const DEFAULT: Option<bool> = Some(false);
        const DESCRIPTION: &'static str = "Enable the translation cache";

        fn parse(value: &str) -> EnvResult<bool> {
            parse_bool(value, Self::NAME)
        }
    }

    /// 缓存 TTL
    pub struct Ttl;
    impl EnvVar<Duration> for Ttl {
        const NAME: &'static str = "CACHE_TTL_SECONDS";
        const DEFAULT: Option<Duration> = Some(Duration::from_secs(3600));
        const DESCRIPTION: &'static str = "Cache entry time-to-live in seconds";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_seconds(value, Self::NAME, 1, 86_400 * 365)
        }
    }
}

/// 安全相关环境变量
pub mod security {
    use super::*;

    /// 主管理员密钥
    pub struct MasterAdminKey;
    impl EnvVar<String> for MasterAdminKey {
        const NAME: &'static str = "MASTER_ADMIN_KEY";
        const DEFAULT: Option<String> = None; // 无默认值，未设置时禁用管理员接口
        const DESCRIPTION: &'static str = "Master secret for key management (X-Admin-Key header)";

        fn parse(value: &str) -> EnvResult<String> {
            let key = value.trim();
            if key.len() < 8 {
                return Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "Admin key must be at least 8 characters".to_string(),
                });
            }
            Ok(key.to_string())
        }
    }

    /// 生成的令牌随机部分长度
    pub struct ApiKeyLength;
    impl EnvVar<usize> for ApiKeyLength {
        const NAME: &'static str = "API_KEY_LENGTH";
        const DEFAULT: Option<usize> = Some(32);
        const DESCRIPTION: &'static str = "Length of the random part of issued API keys";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 16, 128)
        }
    }
}

/// 辅助函数
fn parse_bool(value: &str, var_name: &str) -> EnvResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enabled" => Ok(true),
        "false" | "0" | "no" | "off" | "disabled" => Ok(false),
        _ => Err(EnvError {
            variable: var_name.to_string(),
            message: format!(
                "Invalid boolean value '{}'. Use: true/false, 1/0, yes/no, on/off, enabled/disabled",
                value
            ),
        }),
    }
}

fn parse_positive_usize(value: &str, var_name: &str, min: usize, max: usize) -> EnvResult<usize> {
    let num: usize = value.trim().parse().map_err(|_| EnvError {
        variable: var_name.to_string(),
        message: "Must be a valid positive number".to_string(),
    })?;

    if num < min {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} is below minimum {}", num, min),
        });
    }

    if num > max {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} exceeds maximum {}", num, max),
        });
    }

    Ok(num)
}

fn parse_seconds(value: &str, var_name: &str, min: u64, max: u64) -> EnvResult<Duration> {
    let seconds = parse_positive_usize(value, var_name, min as usize, max as usize)?;
    Ok(Duration::from_secs(seconds as u64))
}

fn parse_non_empty(value: &str, var_name: &str) -> EnvResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: "Value cannot be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn doc_line<V: EnvVar<T>, T: fmt::Debug>() -> String {
    match V::fallback() {
        Some(default) => format!("- `{}`: {} (default: {:?})\n", V::NAME, V::DESCRIPTION, default),
        None => format!("- `{}`: {} (no default)\n", V::NAME, V::DESCRIPTION),
    }
}

/// 环境变量文档生成器
pub fn generate_env_docs() -> String {
    let mut docs = String::new();
    docs.push_str("# Environment Variables Documentation\n\n");

    docs.push_str("## Core Configuration\n\n");
    docs.push_str(&doc_line::<core::Mode, _>());
    docs.push_str(&doc_line::<core::LogLevel, _>());

    docs.push_str("\n## Web Server Configuration\n\n");
    docs.push_str(&doc_line::<web::BindAddress, _>());
    docs.push_str(&doc_line::<web::Port, _>());
    docs.push_str(&doc_line::<web::MaxUploadBytes, _>());

    docs.push_str("\n## Store Configuration\n\n");
    docs.push_str(&doc_line::<store::Backend, _>());
    docs.push_str(&doc_line::<store::DatabasePath, _>());
    docs.push_str(&doc_line::<store::MongoUrl, _>());
    docs.push_str(&doc_line::<store::MongoDatabase, _>());

    docs.push_str("\n## Translation Engine Configuration\n\n");
    docs.push_str(&doc_line::<upstream::Url, _>());
    docs.push_str(&doc_line::<upstream::ApiKey, _>());
    docs.push_str(&doc_line::<upstream::TextTimeout, _>());
    docs.push_str(&doc_line::<upstream::FileTimeout, _>());
    docs.push_str(&doc_line::<upstream::DetectTimeout, _>());

    docs.push_str("\n## Cache Configuration\n\n");
    docs.push_str(&doc_line::<cache::Enabled, _>());
    docs.push_str(&doc_line::<cache::Ttl, _>());

    docs.push_str("\n## Security Configuration\n\n");
    docs.push_str(&doc_line::<security::MasterAdminKey, _>());
    docs.push_str(&doc_line::<security::ApiKeyLength, _>());

    docs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_mode_parsing() {
        assert_eq!(core::Mode::parse("development").unwrap(), "development");
        assert_eq!(core::Mode::parse("PROD").unwrap(), "production");
        assert!(core::Mode::parse("invalid").is_err());
    }

    #[test]
    fn test_boolean_parsing() {
        assert!(cache::Enabled::parse("true").unwrap());
        assert!(cache::Enabled::parse("1").unwrap());
        assert!(cache::Enabled::parse("YES").unwrap());
        assert!(!cache::Enabled::parse("false").unwrap());
        assert!(!cache::Enabled::parse("off").unwrap());
        assert!(cache::Enabled::parse("maybe").is_err());
    }

    #[test]
    fn test_url_validation() {
        assert!(upstream::Url::parse("http://localhost:5000").is_ok());
        assert!(upstream::Url::parse("https://translate.example.com").is_ok());
        assert!(upstream::Url::parse("ftp://example.com").is_err());
        assert!(upstream::Url::parse("not-a-url").is_err());
    }

    #[test]
    fn test_numeric_validation() {
        assert_eq!(cache::Ttl::parse("3600").unwrap(), Duration::from_secs(3600));
        assert!(cache::Ttl::parse("0").is_err());
        assert!(security::ApiKeyLength::parse("8").is_err());
        assert_eq!(web::Port::parse("8080").unwrap(), 8080);
        assert!(web::Port::parse("0").is_err());
    }

    #[test]
    fn test_admin_key_minimum_length() {
        assert!(security::MasterAdminKey::parse("short").is_err());
        assert!(security::MasterAdminKey::parse("long-enough-secret").is_ok());
    }

    #[test]
    fn test_unset_variable_uses_fallback() {
        // 该变量名不会出现在测试环境中
        assert!(store::MongoDatabase::lookup().is_none());
        assert_eq!(store::MongoDatabase::get().unwrap(), "libre_gateway");
    }

    #[test]
    fn test_env_docs_lists_every_group() {
        let docs = generate_env_docs();
        assert!(docs.contains("LIBRETRANSLATE_URL"));
        assert!(docs.contains("MASTER_ADMIN_KEY"));
        assert!(docs.contains("CACHE_TTL_SECONDS"));
        assert!(docs.contains("(no default)"));
    }
}
