//! 审计日志中间件
//!
//! 每个请求两条结构化日志（target = "audit"）：
//! - `API_REQUEST`：入站时记录，同时确定 correlation id
//! - `API_RESPONSE`：出站时记录状态码与耗时
//!
//! 异常情况额外输出 `SECURITY_EVENT`（warn 级别），各事件独立判断。
//! 账号、卡号、完整用户ID与会话ID不会出现在审计记录中。

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use super::correlation_id::{CorrelationId, CorrelationIdGenerator};
use crate::{
    app_state::AppState,
    domain::{
        auth_context::{AuthContext, HEADER_CORRELATION_ID, HEADER_SESSION_ID, HEADER_USER_ID},
        rate_limit_key::resolve_client_ip,
        route::MatchedRoute,
    },
    error::AppErrorCode,
    infrastructure::log_sanitizer::{
        mask_session_id, mask_user_id, sanitize_path, sanitize_user_agent,
    },
    metrics,
};

pub const AUDIT_TARGET: &str = "audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    UnauthorizedAccess,
    RateLimitExceeded,
    SlowRequest,
    UpstreamTimeout,
}

impl SecurityEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEvent::UnauthorizedAccess => "UNAUTHORIZED_ACCESS",
            SecurityEvent::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            SecurityEvent::SlowRequest => "SLOW_REQUEST",
            SecurityEvent::UpstreamTimeout => "UPSTREAM_TIMEOUT",
        }
    }
}

/// 按响应结果判断需要上报的安全事件（互不排斥）
pub fn detect_security_events(
    status: StatusCode,
    elapsed: Duration,
    slow_threshold: Duration,
    error_code: Option<AppErrorCode>,
) -> Vec<SecurityEvent> {
    let mut events = Vec::new();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        events.push(SecurityEvent::UnauthorizedAccess);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        events.push(SecurityEvent::RateLimitExceeded);
    }
    if elapsed > slow_threshold {
        events.push(SecurityEvent::SlowRequest);
    }
    // 只统计网关自己合成的 504，后端透传的不算
    if error_code == Some(AppErrorCode::BackendTimeout) {
        events.push(SecurityEvent::UpstreamTimeout);
    }
    events
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub event_type: &'static str,
    pub correlation_id: String,
    pub method: String,
    pub path: String,
    pub route_id: Option<String>,
    pub user_id: String,
    pub session_id: String,
    pub client_ip: String,
    pub user_agent: String,
    pub status: Option<u16>,
    pub duration_ms: Option<u64>,
    pub error_code: Option<&'static str>,
    pub log_level: &'static str,
    pub timestamp: String,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl AuditRecord {
    /// 入站记录；用户与会话取自入站头并脱敏
    pub fn request(req: &Request, correlation_id: &CorrelationId, remote: Option<SocketAddr>) -> Self {
        let headers = req.headers();
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| req.uri().path());

        Self {
            event_type: "API_REQUEST",
            correlation_id: correlation_id.as_str().to_string(),
            method: req.method().to_string(),
            path: sanitize_path(path_and_query),
            route_id: req
                .extensions()
                .get::<MatchedRoute>()
                .map(|MatchedRoute(route)| route.id.clone()),
            user_id: mask_user_id(header(HEADER_USER_ID)),
            session_id: mask_session_id(header(HEADER_SESSION_ID)),
            client_ip: resolve_client_ip(headers, remote),
            user_agent: sanitize_user_agent(header("user-agent")),
            status: None,
            duration_ms: None,
            error_code: None,
            log_level: "INFO",
            timestamp: now_rfc3339(),
        }
    }

    /// 出站记录；认证成功时使用令牌中的用户与会话
    pub fn response(
        &self,
        status: StatusCode,
        elapsed: Duration,
        error_code: Option<AppErrorCode>,
        auth: Option<&AuthContext>,
    ) -> Self {
        let (user_id, session_id) = match auth {
            Some(ctx) => (
                mask_user_id(Some(&ctx.user_id)),
                mask_session_id(ctx.session_id.as_deref()),
            ),
            None => (self.user_id.clone(), self.session_id.clone()),
        };

        Self {
            event_type: "API_RESPONSE",
            user_id,
            session_id,
            status: Some(status.as_u16()),
            duration_ms: Some(elapsed.as_millis() as u64),
            error_code: error_code.map(|c| c.as_str()),
            log_level: if status.as_u16() >= 400 { "ERROR" } else { "INFO" },
            timestamp: now_rfc3339(),
            ..self.clone()
        }
    }

    pub fn emit(&self) {
        macro_rules! audit_event {
            ($level:expr) => {
                tracing::event!(
                    target: AUDIT_TARGET,
                    $level,
                    event_type = self.event_type,
                    correlation_id = %self.correlation_id,
                    method = %self.method,
                    path = %self.path,
                    route_id = self.route_id.as_deref().unwrap_or("-"),
                    user_id = %self.user_id,
                    session_id = %self.session_id,
                    client_ip = %self.client_ip,
                    user_agent = %self.user_agent,
                    status = self.status,
                    duration_ms = self.duration_ms,
                    error_code = self.error_code,
                    log_level = self.log_level,
                    timestamp = %self.timestamp,
                    "{}",
                    self.event_type
                )
            };
        }

        if self.log_level == "ERROR" {
            audit_event!(tracing::Level::ERROR);
        } else {
            audit_event!(tracing::Level::INFO);
        }
    }

    pub fn emit_security_event(&self, event: SecurityEvent) {
        tracing::warn!(
            target: AUDIT_TARGET,
            event_type = "SECURITY_EVENT",
            security_event = event.as_str(),
            correlation_id = %self.correlation_id,
            method = %self.method,
            path = %self.path,
            user_id = %self.user_id,
            client_ip = %self.client_ip,
            status = self.status,
            duration_ms = self.duration_ms,
            "SECURITY_EVENT {}",
            event.as_str()
        );
    }
}

pub async fn audit_log_middleware(
    State(st): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();

    let correlation_id = CorrelationIdGenerator::get_or_generate(req.headers());
    if let Some(value) = correlation_id.header_value() {
        req.headers_mut().insert(HEADER_CORRELATION_ID, value);
    }
    req.extensions_mut().insert(correlation_id.clone());

    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let inbound = AuditRecord::request(&req, &correlation_id, remote);
    inbound.emit();

    let mut response = next.run(req).await;

    let elapsed = started.elapsed();
    let status = response.status();
    let error_code = response.extensions().get::<AppErrorCode>().copied();
    let outcome = inbound.response(
        status,
        elapsed,
        error_code,
        response.extensions().get::<AuthContext>(),
    );
    outcome.emit();

    let events = detect_security_events(
        status,
        elapsed,
        st.config.audit.slow_request_threshold(),
        error_code,
    );
    for event in events {
        outcome.emit_security_event(event);
        metrics::record_security_event(event.as_str());
    }
    if let Some(code) = error_code {
        metrics::record_rejection(code);
    }
    metrics::record_request(
        outcome.route_id.as_deref().unwrap_or(metrics::UNROUTED),
        status.as_u16(),
    );

    if let Some(value) = correlation_id.header_value() {
        response.headers_mut().insert(HEADER_CORRELATION_ID, value);
    }
    response
}
