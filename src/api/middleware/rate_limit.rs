//! 路由级速率限制中间件（令牌桶）
//! 限流键按路由策略计算：user / ip / path / session / role
//! 用户身份只来自认证阶段放入请求扩展的 `AuthContext`

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::route_match::matched_route;
use crate::{
    app_state::AppState,
    domain::{
        auth_context::AuthContext,
        rate_limit_key::{resolve_key, RequestIdentity},
        route::MatchedRoute,
    },
    error::AppError,
    infrastructure::rate_limit_store::{acquire_with_timeout, BucketSpec, RateLimitDecision},
};

pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_REPLENISH_RATE: &str = "x-ratelimit-replenish-rate";
pub const HEADER_BURST_CAPACITY: &str = "x-ratelimit-burst-capacity";

fn insert_rate_limit_headers(headers: &mut HeaderMap, spec: BucketSpec, decision: RateLimitDecision) {
    headers.insert(HEADER_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(HEADER_REPLENISH_RATE, HeaderValue::from(spec.replenish_rate));
    headers.insert(HEADER_BURST_CAPACITY, HeaderValue::from(spec.burst_capacity));
}

pub async fn rate_limit_middleware(
    State(st): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(MatchedRoute(route)) = matched_route(&req) else {
        return next.run(req).await;
    };
    let Some(limit) = route.rate_limit else {
        return next.run(req).await;
    };

    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let path = req.uri().path();
    let identity = match req.extensions().get::<AuthContext>() {
        Some(ctx) => RequestIdentity::authenticated(ctx, req.headers(), remote, path),
        None if st.config.rate_limiter.trust_identity_headers => {
            RequestIdentity::from_propagated_headers(req.headers(), remote, path)
        }
        None => RequestIdentity::anonymous(req.headers(), remote, path),
    };
    let key = resolve_key(limit.strategy, &identity);
    let spec = limit.bucket();

    let decision = match acquire_with_timeout(
        st.rate_limiter.as_ref(),
        &key,
        spec,
        st.config.rate_limiter.store_timeout(),
    )
    .await
    {
        Ok(decision) => decision,
        Err(e) => {
            // 存储不可用时放行
            tracing::error!(
                route_id = %route.id,
                backend = st.rate_limiter.backend_name(),
                error = %e,
                "rate limit check failed, allowing request"
            );
            crate::metrics::inc_rate_limit_store_failure();
            return next.run(req).await;
        }
    };

    if !decision.allowed {
        tracing::warn!(
            route_id = %route.id,
            strategy = ?limit.strategy,
            "rate limit exceeded"
        );
        let mut response = AppError::rate_limit_exceeded().into_response();
        let headers = response.headers_mut();
        insert_rate_limit_headers(headers, spec, decision);
        headers.insert(
            axum::http::header::RETRY_AFTER,
            HeaderValue::from(spec.retry_after_secs()),
        );
        return response;
    }

    let mut response = next.run(req).await;
    insert_rate_limit_headers(response.headers_mut(), spec, decision);
    response
}
