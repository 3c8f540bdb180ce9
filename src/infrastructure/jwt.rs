//! JWT Token 生成和验证模块
//!
//! HS256 签名，签名密钥启动时读取一次；校验完全无状态（签名、签发者、过期时间）。

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::JwtConfig, error::AppErrorCode};

/// 令牌类型；每个签发的令牌恰好属于一种
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT Claims（私有声明使用 camelCase）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<TokenType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub mfa_verified: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// 仅刷新令牌携带，供后续吊销追踪
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
}

/// 签发令牌所需的用户上下文（由认证服务提供）
#[derive(Debug, Clone, Default)]
pub struct UserAuthentication {
    pub user_id: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub session_id: Option<String>,
    pub mfa_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("token signature mismatch")]
    InvalidSignature,
    #[error("unsupported token: {0}")]
    Unsupported(String),
    #[error("token type not accepted here")]
    WrongType,
    #[error("refresh token subject does not match user")]
    SubjectMismatch,
    #[error("failed to encode token: {0}")]
    Encoding(String),
}

impl TokenError {
    pub fn code(&self) -> AppErrorCode {
        match self {
            TokenError::Expired => AppErrorCode::TokenExpired,
            TokenError::Malformed(_) => AppErrorCode::TokenMalformed,
            TokenError::InvalidSignature => AppErrorCode::TokenInvalidSignature,
            TokenError::Unsupported(_) | TokenError::SubjectMismatch => {
                AppErrorCode::TokenUnsupported
            }
            TokenError::WrongType => AppErrorCode::TokenWrongType,
            TokenError::Encoding(_) => AppErrorCode::Internal,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => TokenError::Malformed(err.to_string()),
            _ => TokenError::Unsupported(err.to_string()),
        }
    }
}

/// JWT 服务：持有启动时构建的密钥，可在请求间共享
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl JwtService {
    pub fn from_config(config: &JwtConfig) -> Result<Self> {
        let secret = config.secret_bytes()?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true; // ✅强制验证过期时间
        validation.leeway = config.leeway_secs;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(&secret),
            decoding: DecodingKey::from_secret(&secret),
            validation,
            issuer: config.issuer.clone(),
            access_ttl: Duration::from_secs(config.access_token_expiry_secs),
            refresh_ttl: Duration::from_secs(config.refresh_token_expiry_secs),
        })
    }

    /// 生成访问令牌
    pub fn generate_access_token(&self, user: &UserAuthentication) -> Result<String, TokenError> {
        let claims = self.build_claims(user, TokenType::Access, self.access_ttl);
        self.encode_claims(&claims)
    }

    /// 生成刷新令牌（携带唯一 tokenId）
    pub fn generate_refresh_token(&self, user: &UserAuthentication) -> Result<String, TokenError> {
        let claims = Claims {
            token_id: Some(Uuid::new_v4().to_string()),
            ..self.build_claims(user, TokenType::Refresh, self.refresh_ttl)
        };
        self.encode_claims(&claims)
    }

    /// 用刷新令牌换取新的访问令牌
    pub fn refresh_access_token(
        &self,
        refresh_token: &str,
        user: &UserAuthentication,
    ) -> Result<String, TokenError> {
        let claims = self.validate_token(refresh_token)?;
        if claims.token_type != Some(TokenType::Refresh) {
            return Err(TokenError::WrongType);
        }
        if claims.sub != user.user_id {
            return Err(TokenError::SubjectMismatch);
        }
        self.generate_access_token(user)
    }

    pub fn encode_claims(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// 校验签名、签发者与过期时间，不检查令牌类型
    pub fn validate_token(&self, token: &str) -> Result<Claims, TokenError> {
        tracing::debug!(token_len = token.len(), "JWT: starting verification");
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims)
    }

    /// 业务路由只接受 ACCESS 令牌；缺少类型声明同样拒绝
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.validate_token(token)?;
        match claims.token_type {
            Some(TokenType::Access) => Ok(claims),
            _ => Err(TokenError::WrongType),
        }
    }

    pub fn will_expire_within(&self, claims: &Claims, window: Duration) -> bool {
        let deadline = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| Utc::now().checked_add_signed(w));
        match deadline {
            Some(deadline) => claims.exp <= deadline.timestamp(),
            None => true,
        }
    }

    fn build_claims(&self, user: &UserAuthentication, typ: TokenType, ttl: Duration) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: user.user_id.clone(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
            token_type: Some(typ),
            username: user.username.clone(),
            email: user.email.clone(),
            roles: user.roles.clone(),
            permissions: user.permissions.clone(),
            session_id: user.session_id.clone(),
            mfa_verified: user.mfa_verified,
            last_login: user.last_login,
            ip_address: user.ip_address.clone(),
            user_agent: user.user_agent.clone(),
            token_id: None,
        }
    }
}
