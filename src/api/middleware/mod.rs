pub mod audit_log;
pub mod auth;
pub mod correlation_id;
pub mod rate_limit;
pub mod route_match;
pub mod security_headers;

pub use audit_log::{audit_log_middleware, AuditRecord, SecurityEvent};
pub use auth::{auth_middleware, extract_bearer_token};
pub use correlation_id::{CorrelationId, CorrelationIdGenerator};
pub use rate_limit::rate_limit_middleware;
pub use route_match::route_match_middleware;
pub use security_headers::{security_headers_middleware, SecurityHeaders};
