use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::infrastructure::{jwt::TokenError, upstream::UpstreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppErrorCode {
    // 认证
    AuthMissing,
    TokenExpired,
    TokenMalformed,
    TokenInvalidSignature,
    TokenUnsupported,
    TokenWrongType,

    // 限流
    RateLimitExceeded,

    // 后端转发
    BackendTimeout,
    BackendUnavailable,
    BadGateway,

    // 请求本身不合法
    InvalidPath,
    PayloadTooLarge,

    RouteNotFound,
    Internal,
}

impl AppErrorCode {
    /// 内部错误码，只写日志和指标，不返回给客户端
    pub fn as_str(&self) -> &'static str {
        match self {
            AppErrorCode::AuthMissing => "AUTH_MISSING",
            AppErrorCode::TokenExpired => "TOKEN_EXPIRED",
            AppErrorCode::TokenMalformed => "TOKEN_MALFORMED",
            AppErrorCode::TokenInvalidSignature => "TOKEN_INVALID_SIGNATURE",
            AppErrorCode::TokenUnsupported => "TOKEN_UNSUPPORTED",
            AppErrorCode::TokenWrongType => "TOKEN_WRONG_TYPE",
            AppErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            AppErrorCode::BackendTimeout => "BACKEND_TIMEOUT",
            AppErrorCode::BackendUnavailable => "BACKEND_UNAVAILABLE",
            AppErrorCode::BadGateway => "BAD_GATEWAY",
            AppErrorCode::InvalidPath => "INVALID_PATH",
            AppErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            AppErrorCode::RouteNotFound => "ROUTE_NOT_FOUND",
            AppErrorCode::Internal => "INTERNAL",
        }
    }

    /// 对外暴露的错误类别（响应体 `error` 字段）
    pub fn category(&self) -> &'static str {
        match self {
            AppErrorCode::AuthMissing
            | AppErrorCode::TokenExpired
            | AppErrorCode::TokenMalformed
            | AppErrorCode::TokenInvalidSignature
            | AppErrorCode::TokenUnsupported
            | AppErrorCode::TokenWrongType => "UNAUTHENTICATED",
            AppErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            AppErrorCode::BackendTimeout => "GATEWAY_TIMEOUT",
            AppErrorCode::BackendUnavailable => "SERVICE_UNAVAILABLE",
            AppErrorCode::BadGateway => "BAD_GATEWAY",
            AppErrorCode::InvalidPath => "BAD_REQUEST",
            AppErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            AppErrorCode::RouteNotFound => "ROUTE_NOT_FOUND",
            AppErrorCode::Internal => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub code: AppErrorCode,
    pub message: String,
    pub status: StatusCode,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
    timestamp: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code.category(),
            message: &self.message,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let mut response = (self.status, Json(body)).into_response();
        // 审计层据此区分网关自身生成的错误与后端透传的错误
        response.extensions_mut().insert(self.code);
        response
    }
}

impl AppError {
    fn new(code: AppErrorCode, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status,
        }
    }

    pub fn auth_missing() -> Self {
        Self::new(
            AppErrorCode::AuthMissing,
            StatusCode::UNAUTHORIZED,
            "Missing or invalid Authorization header",
        )
    }

    pub fn rate_limit_exceeded() -> Self {
        Self::new(
            AppErrorCode::RateLimitExceeded,
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests, please retry later",
        )
    }

    pub fn backend_timeout() -> Self {
        Self::new(
            AppErrorCode::BackendTimeout,
            StatusCode::GATEWAY_TIMEOUT,
            "Upstream service did not respond in time",
        )
    }

    pub fn backend_unavailable() -> Self {
        Self::new(
            AppErrorCode::BackendUnavailable,
            StatusCode::SERVICE_UNAVAILABLE,
            "Upstream service is unavailable",
        )
    }

    pub fn bad_gateway() -> Self {
        Self::new(
            AppErrorCode::BadGateway,
            StatusCode::BAD_GATEWAY,
            "Upstream service returned an invalid response",
        )
    }

    pub fn invalid_path() -> Self {
        Self::new(
            AppErrorCode::InvalidPath,
            StatusCode::BAD_REQUEST,
            "Request path is not allowed",
        )
    }

    pub fn payload_too_large() -> Self {
        Self::new(
            AppErrorCode::PayloadTooLarge,
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request body is too large",
        )
    }

    pub fn route_not_found() -> Self {
        Self::new(
            AppErrorCode::RouteNotFound,
            StatusCode::NOT_FOUND,
            "No route matches the requested path",
        )
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Internal, StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        let code = err.code();
        // 所有令牌校验失败对外只给出通用提示
        let message = match code {
            AppErrorCode::TokenWrongType => "Invalid token type for API access",
            _ => "Invalid authentication token",
        };
        Self::new(code, StatusCode::UNAUTHORIZED, message)
    }
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Timeout(_) => Self::backend_timeout(),
            UpstreamError::Unavailable(_) => Self::backend_unavailable(),
            UpstreamError::BadGateway(_) => Self::bad_gateway(),
            UpstreamError::PayloadTooLarge(_) => Self::payload_too_large(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "internal gateway error");
        Self::internal("Internal gateway error")
    }
}
