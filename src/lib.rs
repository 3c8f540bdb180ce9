//! Funbank 网关 - 银行 API 网关过滤器流水线
//!
//! 路由匹配 -> 审计日志 -> 安全头 -> JWT 认证与上下文传播 -> 限流 -> 转发

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod metrics;

// 重新导出常用类型
pub use app_state::AppState;
pub use error::{AppError, AppErrorCode};

pub mod prelude {
    pub use crate::{
        app_state::AppState,
        config::Config,
        domain::{AuthContext, RateLimitStrategy, RouteTable},
        error::{AppError, AppErrorCode},
        infrastructure::{JwtService, RateLimitStore},
    };
}
