//! 网关本地处理器：健康检查、信息、指标，以及兜底的转发处理器

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::middleware::route_match::matched_route;
use crate::{
    app_state::AppState,
    domain::route::{MatchedRoute, RejectedPath},
    error::AppError,
    infrastructure::log_sanitizer::sanitize_path,
    metrics,
};

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "UP" }))
}

pub async fn info(State(st): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "routes": st.routes.len(),
        "rate_limit_backend": st.rate_limiter.backend_name(),
    }))
}

pub async fn prometheus_metrics() -> Response {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_prometheus(),
    )
        .into_response()
}

/// 转发到匹配路由的后端；去掉路由前缀后保留查询串
pub async fn proxy(State(st): State<Arc<AppState>>, req: Request) -> Result<Response, AppError> {
    if req.extensions().get::<RejectedPath>().is_some() {
        return Err(AppError::invalid_path());
    }
    let Some(MatchedRoute(route)) = matched_route(&req) else {
        tracing::debug!(path = %sanitize_path(req.uri().path()), "no route for request");
        return Err(AppError::route_not_found());
    };

    let mut target = route.strip_path(req.uri().path());
    if let Some(query) = req.uri().query() {
        target.push('?');
        target.push_str(query);
    }
    let base_uri = route.next_uri();

    tracing::debug!(route_id = %route.id, base_uri = %base_uri, "forwarding request");

    let response = st
        .upstream
        .forward(base_uri, &target, req, route.timeout)
        .await?;
    Ok(response)
}
