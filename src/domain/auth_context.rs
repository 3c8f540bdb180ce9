//! 已认证请求上下文：由令牌声明派生，只以请求头形式传给后端，不在服务端存储

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::infrastructure::jwt::Claims;

pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_USERNAME: &str = "x-username";
pub const HEADER_USER_ROLES: &str = "x-user-roles";
pub const HEADER_USER_PERMISSIONS: &str = "x-user-permissions";
pub const HEADER_SESSION_ID: &str = "x-session-id";
pub const HEADER_MFA_VERIFIED: &str = "x-mfa-verified";
pub const HEADER_CORRELATION_ID: &str = "x-correlation-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub username: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub session_id: Option<String>,
    pub mfa_verified: bool,
    pub correlation_id: String,
}

impl AuthContext {
    pub fn from_claims(claims: &Claims, correlation_id: &str) -> Self {
        Self {
            user_id: claims.sub.clone(),
            username: claims.username.clone(),
            roles: claims.roles.clone(),
            permissions: claims.permissions.clone(),
            session_id: claims.session_id.clone(),
            mfa_verified: claims.mfa_verified,
            correlation_id: correlation_id.to_string(),
        }
    }

    /// 生成向后端传递的请求头（角色、权限按原顺序逗号拼接）
    pub fn header_pairs(&self) -> [(&'static str, String); 7] {
        [
            (HEADER_USER_ID, self.user_id.clone()),
            (HEADER_USERNAME, self.username.clone().unwrap_or_default()),
            (HEADER_USER_ROLES, self.roles.join(",")),
            (HEADER_USER_PERMISSIONS, self.permissions.join(",")),
            (HEADER_SESSION_ID, self.session_id.clone().unwrap_or_default()),
            (HEADER_MFA_VERIFIED, self.mfa_verified.to_string()),
            (HEADER_CORRELATION_ID, self.correlation_id.clone()),
        ]
    }

    /// 覆盖客户端自带的同名头；值不合法时删除该头，不透传伪造值
    pub fn apply_to(&self, headers: &mut HeaderMap) {
        for (name, value) in self.header_pairs() {
            let name = HeaderName::from_static(name);
            match HeaderValue::from_str(&value) {
                Ok(v) => {
                    headers.insert(name, v);
                }
                Err(_) => {
                    tracing::warn!(header = %name, "dropping context header with invalid value");
                    headers.remove(name);
                }
            }
        }
    }
}
