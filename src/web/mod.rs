//! Web 服务器模块
//!
//! 网关的 HTTP 接口：路由、凭证提取、错误映射和服务生命周期。

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod types;

pub use error::{ApiError, ApiResult, ErrorBody};
pub use routes::create_routes;
pub use types::AppState;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{helpers, GatewayResult};
use crate::gateway::Gateway;

/// multipart 边界与其他字段占用的余量
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Web 服务器
pub struct WebServer {
    addr: SocketAddr,
    gateway: Gateway,
}

impl WebServer {
    pub fn new(addr: SocketAddr, gateway: Gateway) -> Self {
        Self { addr, gateway }
    }

    /// 启动服务，收到 Ctrl-C 或 SIGTERM 后停止接收新连接，处理完在途请求后关闭存储
    pub async fn start(self) -> GatewayResult<()> {
        let app = create_router(Arc::new(AppState::new(self.gateway.clone())));

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| helpers::config_error(format!("无法绑定 {}: {}", self.addr, e)))?;

        info!(
            "网关已启动: http://{} (存储: {})",
            self.addr,
            self.gateway.store_backend()
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| helpers::config_error(format!("服务器错误: {}", e)))?;

        info!("服务器已停止，关闭存储");
        self.gateway.shutdown().await
    }
}

/// 创建带中间件的路由器
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.gateway.settings().max_upload_bytes + BODY_LIMIT_SLACK;

    create_routes()
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("无法监听 Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("无法监听 SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到 Ctrl-C，开始优雅关闭"),
        _ = terminate => info!("收到 SIGTERM，开始优雅关闭"),
    }
}
