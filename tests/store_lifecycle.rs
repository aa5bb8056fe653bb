// 持久化存储生命周期集成测试

mod common;

use std::sync::Arc;

use libre_gateway::config::{ConfigError, GatewayConfig};
use libre_gateway::gateway::{Gateway, PresentedCredentials, TranslateRequest};
use libre_gateway::store::{Store, StoreBackend, StoreConfig};
use libre_gateway::utils::SystemClock;

use common::{test_settings, FakeTranslator};

fn sqlite_config(path: &std::path::Path) -> StoreConfig {
    StoreConfig {
        backend: StoreBackend::Sqlite,
        database_path: path.display().to_string(),
        ..StoreConfig::default()
    }
}

async fn open_gateway(config: &StoreConfig, translator: Arc<FakeTranslator>) -> Gateway {
    let store = Store::open(config).await.expect("open store");
    Gateway::new(store, translator, Arc::new(SystemClock), test_settings())
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&dir.path().join("nested").join("gateway.db"));
    let translator = Arc::new(FakeTranslator::new());

    let gateway = open_gateway(&config, translator.clone()).await;
    let token = gateway
        .create_key(&PresentedCredentials::admin(common::ADMIN_KEY), Some("App"), None, None)
        .await
        .unwrap()
        .token;
    let credentials = PresentedCredentials::api_key(token.as_str());
    gateway
        .translate(&credentials, TranslateRequest::new("Hello", "en", "fr"))
        .await
        .unwrap();
    gateway.shutdown().await.unwrap();

    let reopened = open_gateway(&config, translator.clone()).await;
    let outcome = reopened
        .translate(&credentials, TranslateRequest::new("Hello", "en", "fr"))
        .await
        .unwrap();

    assert!(outcome.from_cache);
    assert_eq!(translator.calls(), 1);

    let key = reopened.keys().validate(&token).await.unwrap().unwrap();
    assert_eq!(key.usage_count, 3);
}

#[tokio::test]
async fn test_mongo_backend_requires_feature() {
    let config = StoreConfig {
        backend: StoreBackend::Mongo,
        mongodb_url: "mongodb://127.0.0.1:1".to_string(),
        ..StoreConfig::default()
    };
    if cfg!(not(feature = "mongo")) {
        assert!(Store::open(&config).await.is_err());
    }
}

#[test]
fn test_malformed_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gateway.toml");
    std::fs::write(&path, "[cache]\nttl_secs = \"soon\"\n").unwrap();

    let error = GatewayConfig::load_from_file(&path).unwrap_err();
    assert!(matches!(error, ConfigError::Parse { .. }));
}

#[test]
fn test_partial_config_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gateway.json");
    std::fs::write(&path, r#"{"cache":{"ttl_secs":120}}"#).unwrap();

    let config = GatewayConfig::load_from_file(&path).unwrap();
    assert_eq!(config.cache.ttl_secs, 120);
    assert_eq!(config.server, GatewayConfig::default().server);
    assert!(config.validate().is_ok());
}
