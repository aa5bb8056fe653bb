//! 网关主程序入口

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use libre_gateway::config::GatewayConfig;
use libre_gateway::env::generate_env_docs;
use libre_gateway::gateway::Gateway;
use libre_gateway::store::Store;
use libre_gateway::translator::libre::LibreTranslateClient;
use libre_gateway::utils::SystemClock;
use libre_gateway::web::WebServer;

/// LibreTranslate Gateway
#[derive(Parser)]
#[command(name = "libre-gateway")]
#[command(about = "Authenticating, metering and caching gateway for LibreTranslate", long_about = None)]
struct Cli {
    /// 配置文件路径（默认按搜索路径查找）
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// 启动 HTTP 服务（默认）
    Serve {
        /// 监听地址
        #[arg(short, long, value_name = "ADDRESS")]
        bind: Option<String>,

        /// 监听端口
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// 初始化存储并签发一个测试密钥
    InitDb,
    /// 打印环境变量文档
    EnvDocs,
    /// 写出包含全部默认值的示例配置文件
    InitConfig {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::EnvDocs) => {
            println!("{}", generate_env_docs());
            Ok(())
        }
        Some(Commands::InitConfig { path }) => {
            GatewayConfig::generate_example_config(&path)?;
            println!("示例配置已写入: {}", path.display());
            Ok(())
        }
        Some(Commands::InitDb) => {
            let config = GatewayConfig::load(cli.config.as_deref())?;
            init_logging(&config);
            init_db(config).await
        }
        Some(Commands::Serve { bind, port }) => {
            let mut config = GatewayConfig::load(cli.config.as_deref())?;
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            init_logging(&config);
            serve(config).await
        }
        None => {
            let config = GatewayConfig::load(cli.config.as_deref())?;
            init_logging(&config);
            serve(config).await
        }
    }
}

/// 日志写到 stderr，stdout 只输出命令结果
fn init_logging(config: &GatewayConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_gateway(config: &GatewayConfig) -> Result<Gateway, Box<dyn std::error::Error>> {
    let store = Store::open(&config.store).await?;
    let translator = LibreTranslateClient::new(&config.upstream.url, config.upstream.api_key.clone())?;
    tracing::info!(engine = %translator.base_url(), "翻译引擎已配置");
    Ok(Gateway::new(
        store,
        Arc::new(translator),
        Arc::new(SystemClock),
        config.gateway_settings(),
    ))
}

async fn serve(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.socket_addr()?;
    if config.is_development() {
        tracing::info!("以开发模式运行");
    }

    let gateway = open_gateway(&config).await?;
    WebServer::new(addr, gateway).start().await?;
    Ok(())
}

async fn init_db(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let gateway = open_gateway(&config).await?;
    let credential = gateway
        .keys()
        .create("Test Key", Some("由 init-db 签发的测试密钥"), None)
        .await?;

    println!("存储已初始化 ({})", gateway.store_backend());
    println!("测试密钥 (只显示这一次): {}", credential.token);

    gateway.shutdown().await?;
    Ok(())
}
