//! HTTP 入口：本地 actuator 端点 + 过滤器流水线 + 兜底转发

pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// 构建网关路由
///
/// 过滤器顺序（外到内）：路由匹配 -> 审计 -> 安全头 -> 认证 -> 限流 -> 转发。
/// 安全头位于认证与限流之外，因此 401/429/504 等网关生成的响应同样带安全头；
/// 审计位于最外层业务过滤器，记录所有最终状态码。
pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/actuator/health", get(handlers::health))
        .route("/actuator/info", get(handlers::info))
        .route("/actuator/metrics", get(handlers::prometheus_metrics))
        .fallback(handlers::proxy)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn_with_state(
                    state.clone(),
                    middleware::route_match_middleware,
                ))
                .layer(from_fn_with_state(
                    state.clone(),
                    middleware::audit_log_middleware,
                ))
                .layer(from_fn_with_state(
                    state.clone(),
                    middleware::security_headers_middleware,
                ))
                .layer(from_fn_with_state(state.clone(), middleware::auth_middleware))
                .layer(from_fn_with_state(
                    state.clone(),
                    middleware::rate_limit_middleware,
                )),
        )
        .with_state(state)
}
