//! Domain 模块
//!
//! 路由表、认证上下文与限流键策略；不依赖具体的网络与存储实现

pub mod auth_context;
pub mod rate_limit_key;
pub mod route;

// 重新导出常用类型
pub use auth_context::AuthContext;
pub use rate_limit_key::{
    determine_primary_role, normalize_path, resolve_client_ip, resolve_key, PrimaryRole,
    RateLimitStrategy, RequestIdentity,
};
pub use route::{
    normalize_request_path, ExcludedPaths, MatchedRoute, PathError, PathPattern, RejectedPath, Route,
    RouteTable,
};
