//! # LibreTranslate Gateway
//!
//! 位于 LibreTranslate 引擎之前的网关：API 密钥认证、用量计量与翻译结果缓存。
//!
//! ## 模块组织
//!
//! - `gateway` - 请求编排（认证、缓存、上游调用、计量）
//! - `cache` - 翻译结果缓存
//! - `keys` - API 密钥注册表
//! - `usage` - 请求用量记录
//! - `store` - 持久化存储（SQLite，可选 MongoDB）
//! - `translator` - 翻译引擎客户端
//! - `config` / `env` - 配置加载与环境变量
//! - `error` - 统一错误类型
//! - `utils` - 哈希与时钟
//! - `web` - HTTP 接口（可选）

pub mod cache;
pub mod config;
pub mod env;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod store;
pub mod translator;
pub mod usage;
pub mod utils;
#[cfg(feature = "web")]
pub mod web;

// Re-export commonly used items for convenience
pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use gateway::{Gateway, GatewaySettings, PresentedCredentials};
pub use store::Store;
