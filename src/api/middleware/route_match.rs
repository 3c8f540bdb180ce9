//! 路由匹配中间件
//! 先规范化路径并改写请求 URI，再把匹配结果放进请求扩展；
//! 未匹配时不拒绝，由转发处理器返回 404

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{uri::PathAndQuery, Uri},
    middleware::Next,
    response::Response,
};

use crate::{
    app_state::AppState,
    domain::route::{normalize_request_path, MatchedRoute, PathError, RejectedPath},
    infrastructure::log_sanitizer::sanitize_path,
};

/// 替换 URI 的路径部分，保留查询串
fn replace_path(uri: &Uri, path: &str) -> Option<Uri> {
    let path_and_query = match uri.query() {
        Some(q) => PathAndQuery::try_from(format!("{path}?{q}")).ok()?,
        None => PathAndQuery::try_from(path).ok()?,
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    Uri::from_parts(parts).ok()
}

pub async fn route_match_middleware(
    State(st): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let normalized = normalize_request_path(req.uri().path());
    match normalized {
        Ok(path) => {
            if path != req.uri().path() {
                match replace_path(req.uri(), &path) {
                    Some(uri) => *req.uri_mut() = uri,
                    None => {
                        req.extensions_mut()
                            .insert(RejectedPath(PathError::Malformed));
                        return next.run(req).await;
                    }
                }
            }
            if let Some(route) = st.routes.resolve(&path, req.headers()) {
                tracing::debug!(route_id = %route.id, path = %sanitize_path(&path), "route matched");
                req.extensions_mut().insert(MatchedRoute(route));
            }
        }
        Err(e) => {
            tracing::warn!(path = %sanitize_path(req.uri().path()), error = %e, "request path rejected");
            req.extensions_mut().insert(RejectedPath(e));
        }
    }
    next.run(req).await
}

/// 从请求扩展中读取匹配的路由
pub fn matched_route(req: &Request) -> Option<MatchedRoute> {
    req.extensions().get::<MatchedRoute>().cloned()
}
