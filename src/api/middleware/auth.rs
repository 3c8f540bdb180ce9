//! 认证中间件：令牌校验 + 上下文传播
//!
//! 认证流程：
//! 1. 路由未开启认证或路径在免认证列表中 → 直接放行，不解析令牌
//! 2. 提取 `Authorization: Bearer <token>`
//! 3. 校验签名、签发者、过期时间与令牌类型（只接受 ACCESS）
//! 4. 声明转换为 `AuthContext`，覆盖写入下游请求头
//! 5. `AuthContext` 同时挂到响应扩展上，供审计日志使用

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};

use super::{
    correlation_id::{CorrelationId, CorrelationIdGenerator},
    route_match::matched_route,
};
use crate::{
    app_state::AppState,
    domain::{auth_context::AuthContext, route::MatchedRoute},
    error::AppError,
    infrastructure::log_sanitizer::sanitize_path,
};

/// 提取 Bearer 令牌；缺失、空值或其他认证方案都返回 None
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn auth_middleware(
    State(st): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(MatchedRoute(route)) = matched_route(&req) else {
        return Ok(next.run(req).await);
    };

    if !route.authenticate {
        return Ok(next.run(req).await);
    }

    if let Some(pattern) = route.excluded_paths.find(req.uri().path()) {
        tracing::debug!(
            route_id = %route.id,
            path = %sanitize_path(req.uri().path()),
            pattern = %pattern.as_str(),
            "path excluded from token validation"
        );
        return Ok(next.run(req).await);
    }

    let Some(token) = extract_bearer_token(req.headers()) else {
        tracing::warn!(route_id = %route.id, "missing or malformed Authorization header");
        return Err(AppError::auth_missing());
    };

    let claims = st.jwt.validate_access_token(token).map_err(|e| {
        // 具体原因只进日志，响应体保持通用提示
        tracing::warn!(
            route_id = %route.id,
            code = e.code().as_str(),
            error = %e,
            "token validation failed"
        );
        AppError::from(e)
    })?;

    let correlation_id = match req.extensions().get::<CorrelationId>() {
        Some(id) => id.clone(),
        None => CorrelationIdGenerator::get_or_generate(req.headers()),
    };
    let ctx = AuthContext::from_claims(&claims, correlation_id.as_str());
    ctx.apply_to(req.headers_mut());
    req.extensions_mut().insert(ctx.clone());

    tracing::debug!(
        route_id = %route.id,
        roles = ctx.roles.len(),
        mfa_verified = ctx.mfa_verified,
        "token validated"
    );

    let mut response = next.run(req).await;
    response.extensions_mut().insert(ctx);
    Ok(response)
}
