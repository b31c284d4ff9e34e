//! 主应用程序入口
//!
//! 加载配置、选择存储后端，启动 Axum Web API 与 WebSocket 服务。

use std::net::SocketAddr;

use anyhow::Context;
use axum::http::HeaderValue;
use config::AppConfig;
use infrastructure::Infrastructure;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    tracing::info!(config = %config.sanitize(), "配置已加载");

    let infra = Infrastructure::build(&config)
        .await
        .context("初始化存储失败")?;
    let state = AppState::from_config(
        &config,
        infra.user_repository.clone(),
        infra.chat_repository.clone(),
        infra.password_hasher_trait(),
    );

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.server.cors_origins));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("无效的监听地址")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(%addr, "聊天服务器已启动");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("聊天服务器已停止");
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "监听退出信号失败");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始关闭");
}
