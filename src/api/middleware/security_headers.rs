//! 安全响应头
//! 所有响应（含网关生成的错误与超时响应）统一加固；从不拒绝请求

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{
        header::{
            CACHE_CONTROL, CONTENT_SECURITY_POLICY, EXPIRES, PRAGMA, REFERRER_POLICY, SERVER,
            STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
        },
        HeaderMap, HeaderName, HeaderValue,
    },
    middleware::Next,
    response::Response,
};

use crate::{app_state::AppState, config::SecurityHeadersConfig};

const HSTS: &str = "max-age=31536000; includeSubDomains; preload";

const CSP: &str = "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; \
img-src 'self' data: https:; font-src 'self' https:; connect-src 'self' https:; \
frame-ancestors 'none'; base-uri 'self'; form-action 'self'; upgrade-insecure-requests";

const PERMISSIONS_POLICY: &str = "geolocation=(), microphone=(), camera=(), payment=(), \
usb=(), serial=(), bluetooth=(), magnetometer=(), accelerometer=(), gyroscope=(), \
ambient-light-sensor=(), autoplay=(), fullscreen=()";

// 框架指纹头
const FINGERPRINT_HEADERS: [&str; 5] = [
    "x-powered-by",
    "x-aspnet-version",
    "x-aspnetmvc-version",
    "x-runtime",
    "x-version",
];

/// 启动时按开关预先计算好的响应头集合
#[derive(Debug, Clone, Default)]
pub struct SecurityHeaders {
    set: Vec<(HeaderName, HeaderValue)>,
    remove: Vec<HeaderName>,
}

impl SecurityHeaders {
    pub fn from_config(config: &SecurityHeadersConfig) -> Self {
        let mut set: Vec<(HeaderName, HeaderValue)> = Vec::new();
        let mut push = |name: HeaderName, value: &'static str| {
            set.push((name, HeaderValue::from_static(value)));
        };

        if config.enable_hsts {
            push(STRICT_TRANSPORT_SECURITY, HSTS);
        }
        if config.enable_content_type_options {
            push(X_CONTENT_TYPE_OPTIONS, "nosniff");
        }
        if config.enable_frame_options {
            push(X_FRAME_OPTIONS, "DENY");
        }
        if config.enable_csp {
            push(CONTENT_SECURITY_POLICY, CSP);
        }
        if config.enable_referrer_policy {
            push(REFERRER_POLICY, "no-referrer");
        }
        if config.enable_permissions_policy {
            push(HeaderName::from_static("permissions-policy"), PERMISSIONS_POLICY);
        }
        if config.enable_cache_control {
            push(CACHE_CONTROL, "no-store, no-cache, must-revalidate, max-age=0");
            push(PRAGMA, "no-cache");
            push(EXPIRES, "0");
        }
        if config.enable_cross_origin_policies {
            push(HeaderName::from_static("cross-origin-embedder-policy"), "require-corp");
            push(HeaderName::from_static("cross-origin-opener-policy"), "same-origin");
            push(HeaderName::from_static("cross-origin-resource-policy"), "same-origin");
        }
        if config.enable_banking_headers {
            push(HeaderName::from_static("x-banking-security"), "enabled");
            push(HeaderName::from_static("x-financial-context"), "secure");
            push(HeaderName::from_static("x-content-security"), "enforced");
        }
        if config.enable_pci_dss_headers {
            push(HeaderName::from_static("x-secure-processing"), "enabled");
            push(HeaderName::from_static("x-data-classification"), "confidential");
            push(HeaderName::from_static("x-security-audit"), "logged");
        }

        let mut remove = Vec::new();
        if config.remove_sensitive_headers {
            remove.extend(FINGERPRINT_HEADERS.iter().map(|h| HeaderName::from_static(*h)));
            // 服务标识：先删除后端的 Server 头再写入网关名称
            remove.push(SERVER);
            match HeaderValue::from_str(&config.server_name) {
                Ok(v) if !config.server_name.is_empty() => set.push((SERVER, v)),
                _ => tracing::warn!("invalid gateway server name, Server header will be removed"),
            }
        }

        Self { set, remove }
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        for name in &self.remove {
            headers.remove(name);
        }
        for (name, value) in &self.set {
            headers.insert(name.clone(), value.clone());
        }
    }
}

pub async fn security_headers_middleware(
    State(st): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let mut response = next.run(req).await;
    st.security_headers.apply(response.headers_mut());
    response
}
