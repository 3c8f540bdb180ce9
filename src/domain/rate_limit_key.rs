//! 限流键策略
//!
//! 同一策略下，逻辑上相同的请求总是得到相同的键。
//! 用户、会话与角色只取自本网关校验过的令牌（`AuthContext`）；
//! 入站的 `X-User-Id`、`X-Session-Id`、`X-User-Roles` 仅在配置为可信上游网关时采用，
//! 否则匿名请求一律按 IP 计数。

use std::{net::SocketAddr, sync::LazyLock};

use axum::http::HeaderMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::auth_context::{AuthContext, HEADER_SESSION_ID, HEADER_USER_ID, HEADER_USER_ROLES};

// 带数字ID的资源路径
static RESOURCE_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/api/(users|accounts|transactions)/\d+(/.*)?$").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitStrategy {
    User,
    Ip,
    Path,
    Session,
    Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrimaryRole {
    Admin,
    Manager,
    Employee,
    PremiumCustomer,
    Customer,
}

impl PrimaryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimaryRole::Admin => "ADMIN",
            PrimaryRole::Manager => "MANAGER",
            PrimaryRole::Employee => "EMPLOYEE",
            PrimaryRole::PremiumCustomer => "PREMIUM_CUSTOMER",
            PrimaryRole::Customer => "CUSTOMER",
        }
    }
}

// 按优先级从高到低；关键字大小写不敏感、子串匹配
const ROLE_TIERS: [(PrimaryRole, &[&str]); 4] = [
    (PrimaryRole::Admin, &["ADMIN", "SUPER"]),
    (PrimaryRole::Manager, &["MANAGER", "SUPERVISOR"]),
    (PrimaryRole::Employee, &["EMPLOYEE", "STAFF"]),
    (PrimaryRole::PremiumCustomer, &["PREMIUM", "VIP"]),
];

/// 从逗号分隔的角色列表中取最高优先级角色，与列表顺序无关
pub fn determine_primary_role(roles: &str) -> PrimaryRole {
    let roles: Vec<String> = roles
        .split(',')
        .map(|r| r.trim().to_uppercase())
        .filter(|r| !r.is_empty())
        .collect();

    ROLE_TIERS
        .iter()
        .find(|(role, keywords)| {
            roles.iter().any(|r| {
                keywords.iter().any(|k| {
                    // SUPERVISOR 属于经理级，不能被 SUPER 提升为管理员
                    r.contains(k) && !(*role == PrimaryRole::Admin && *k == "SUPER" && r.contains("SUPERVISOR"))
                })
            })
        })
        .map(|(role, _)| *role)
        .unwrap_or(PrimaryRole::Customer)
}

/// `/api/{users|accounts|transactions}/<数字>` 中的ID替换为 `{id}`，保留后续子路径
pub fn normalize_path(path: &str) -> String {
    match RESOURCE_ID_REGEX.captures(path) {
        Some(caps) => format!(
            "/api/{}/{{id}}{}",
            &caps[1],
            caps.get(2).map(|m| m.as_str()).unwrap_or("")
        ),
        None => path.to_string(),
    }
}

/// 客户端IP：X-Forwarded-For 第一个 → X-Real-IP → 连接地址 → "unknown"
pub fn resolve_client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    remote
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// 计算限流键所需的请求身份
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub roles: Option<String>,
    pub client_ip: String,
    pub path: String,
}

fn non_empty_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl RequestIdentity {
    /// 未认证请求：只有客户端IP与路径
    pub fn anonymous(headers: &HeaderMap, remote: Option<SocketAddr>, path: &str) -> Self {
        Self {
            user_id: None,
            session_id: None,
            roles: None,
            client_ip: resolve_client_ip(headers, remote),
            path: path.to_string(),
        }
    }

    /// 令牌校验通过的请求
    pub fn authenticated(
        ctx: &AuthContext,
        headers: &HeaderMap,
        remote: Option<SocketAddr>,
        path: &str,
    ) -> Self {
        let non_empty = |v: &str| Some(v.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            user_id: non_empty(ctx.user_id.as_str()),
            session_id: ctx.session_id.as_deref().and_then(non_empty),
            roles: non_empty(ctx.roles.join(",").as_str()),
            ..Self::anonymous(headers, remote, path)
        }
    }

    /// 可信上游网关已传播的身份头（网关级联）
    pub fn from_propagated_headers(
        headers: &HeaderMap,
        remote: Option<SocketAddr>,
        path: &str,
    ) -> Self {
        Self {
            user_id: non_empty_header(headers, HEADER_USER_ID),
            session_id: non_empty_header(headers, HEADER_SESSION_ID),
            roles: non_empty_header(headers, HEADER_USER_ROLES),
            ..Self::anonymous(headers, remote, path)
        }
    }

    fn user_or_ip(&self) -> String {
        match &self.user_id {
            Some(id) => format!("user:{}", id),
            None => format!("ip:{}", self.client_ip),
        }
    }
}

pub fn resolve_key(strategy: RateLimitStrategy, identity: &RequestIdentity) -> String {
    match strategy {
        RateLimitStrategy::User => identity.user_or_ip(),
        RateLimitStrategy::Ip => format!("ip:{}", identity.client_ip),
        RateLimitStrategy::Path => {
            let path = normalize_path(&identity.path);
            match &identity.user_id {
                Some(id) => format!("user-path:{}:{}", id, path),
                None => format!("ip-path:{}:{}", identity.client_ip, path),
            }
        }
        RateLimitStrategy::Session => match &identity.session_id {
            Some(session) => format!("session:{}", session),
            None => identity.user_or_ip(),
        },
        RateLimitStrategy::Role => match (&identity.user_id, &identity.roles) {
            (Some(id), Some(roles)) => {
                format!("role-user:{}:{}", determine_primary_role(roles).as_str(), id)
            }
            _ => format!("ip:{}", identity.client_ip),
        },
    }
}
