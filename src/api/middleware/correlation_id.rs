//! Correlation ID
//! 每个请求只确定一次：沿用入站 `X-Correlation-Id`，否则生成 UUID v4

use axum::http::{HeaderMap, HeaderValue};
use uuid::Uuid;

use crate::domain::auth_context::HEADER_CORRELATION_ID;

/// 请求扩展：当前请求的 correlation id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.0).ok()
    }
}

/// Correlation ID 生成器
pub struct CorrelationIdGenerator;

impl CorrelationIdGenerator {
    pub fn generate() -> String {
        Uuid::new_v4().to_string()
    }

    /// 优先从请求头获取，空值或非法值视为缺失
    pub fn get_or_generate(headers: &HeaderMap) -> CorrelationId {
        let inbound = headers
            .get(HEADER_CORRELATION_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match inbound {
            Some(id) => CorrelationId(id.to_string()),
            None => CorrelationId(Self::generate()),
        }
    }
}
