//! Funbank 网关主入口

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use funbank_gateway::{api, app_state::AppState, config::Config, infrastructure::logging};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置（环境变量 > .env 覆盖层 > CONFIG_PATH 指向的 TOML）
    let config = Config::load().context("failed to load gateway configuration")?;

    // 2. 初始化日志
    logging::init_logging(&config.logging)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        routes = config.routes.len(),
        "🚀 Starting Funbank gateway"
    );

    // 3. 构建共享状态
    let config = Arc::new(config);
    let state = Arc::new(AppState::new(config.clone()).await?);

    // 4. 启动服务
    let app = api::routes(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    tracing::info!("🎉 Gateway listening on http://{}", config.server.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
