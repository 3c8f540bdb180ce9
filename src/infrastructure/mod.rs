pub mod cache;
pub mod jwt;
pub mod log_sanitizer;
pub mod logging;
pub mod rate_limit_store;
pub mod upstream;

pub use cache::RedisRateLimitStore;
pub use jwt::{Claims, JwtService, TokenError, TokenType, UserAuthentication};
pub use rate_limit_store::{
    BucketSpec, InMemoryRateLimitStore, RateLimitDecision, RateLimitStore, RateLimitStoreError,
};
pub use upstream::{UpstreamClient, UpstreamError};
