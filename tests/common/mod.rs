//! 测试辅助模块
//! 本地回显后端 + 指向它的网关配置 + 令牌工具

#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use async_trait::async_trait;
use funbank_gateway::{
    api,
    app_state::AppState,
    config::{Config, EnvSource, RateLimitConfig, RouteConfig},
    domain::RateLimitStrategy,
    infrastructure::{
        jwt::{JwtService, UserAuthentication},
        rate_limit_store::{
            BucketSpec, InMemoryRateLimitStore, RateLimitDecision, RateLimitStore,
            RateLimitStoreError,
        },
    },
};
use serde_json::{json, Value};

pub const TEST_SECRET: &str = "integration_test_secret_at_least_32_bytes!";

/// 回显后端：返回收到的路径、查询串与请求头
///
/// 路径包含 `slow` 时延迟 2 秒；包含 `fail` 时返回 500 并带框架指纹头
pub struct Backend {
    pub base_url: String,
    pub hits: Arc<AtomicUsize>,
}

impl Backend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn echo(State(hits): State<Arc<AtomicUsize>>, req: Request) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    let path = req.uri().path().to_string();

    if path.contains("slow") {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    if path.contains("fail") {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("x-powered-by", "Express"), ("server", "backend/1.0")],
            "boom",
        )
            .into_response();
    }

    let headers: BTreeMap<String, String> = req
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();
    Json(json!({
        "method": req.method().as_str(),
        "path": path,
        "query": req.uri().query(),
        "headers": headers,
    }))
    .into_response()
}

pub async fn spawn_backend() -> Backend {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new().fallback(echo).with_state(hits.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind backend");
    let addr = listener.local_addr().expect("backend addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("backend server");
    });
    Backend {
        base_url: format!("http://{addr}"),
        hits,
    }
}

fn route(id: &str, prefix: &str, uri: &str) -> RouteConfig {
    RouteConfig {
        id: id.to_string(),
        path_prefixes: vec![prefix.to_string()],
        uris: vec![uri.to_string()],
        strip_prefix: 1,
        authenticate: false,
        excluded_paths: Vec::new(),
        required_headers: BTreeMap::new(),
        rate_limit: None,
        timeout_ms: None,
    }
}

fn limit(strategy: RateLimitStrategy, replenish_rate: u32, burst_capacity: u32) -> Option<RateLimitConfig> {
    Some(RateLimitConfig {
        strategy,
        replenish_rate,
        burst_capacity,
    })
}

/// 测试路由表
///
/// - accounts：需认证，按用户限流，500ms 超时，`/api/accounts/public` 免认证
/// - auth：免认证，按 IP 限流（突发 3）
/// - profiles / sessions：需认证，按主角色 / 会话限流
/// - transactions：需认证，按用户+规范化路径限流（突发 2）
/// - config：要求 `X-Admin-Access: true`
/// - dead：指向无人监听的端口
pub fn test_routes(backend_url: &str) -> Vec<RouteConfig> {
    vec![
        RouteConfig {
            authenticate: true,
            excluded_paths: vec!["/api/accounts/public".to_string(), "/api/auth/login".to_string()],
            rate_limit: Some(RateLimitConfig {
                strategy: RateLimitStrategy::User,
                replenish_rate: 100,
                burst_capacity: 100,
            }),
            timeout_ms: Some(500),
            ..route("accounts", "/api/accounts", backend_url)
        },
        RouteConfig {
            rate_limit: Some(RateLimitConfig {
                strategy: RateLimitStrategy::Ip,
                replenish_rate: 1,
                burst_capacity: 3,
            }),
            ..route("auth", "/api/auth", backend_url)
        },
        RouteConfig {
            authenticate: true,
            rate_limit: limit(RateLimitStrategy::Role, 100, 100),
            ..route("profiles", "/api/profiles", backend_url)
        },
        RouteConfig {
            authenticate: true,
            rate_limit: limit(RateLimitStrategy::Session, 100, 100),
            ..route("sessions", "/api/sessions", backend_url)
        },
        RouteConfig {
            authenticate: true,
            rate_limit: limit(RateLimitStrategy::Path, 1, 2),
            ..route("transactions", "/api/transactions", backend_url)
        },
        RouteConfig {
            strip_prefix: 0,
            required_headers: BTreeMap::from([("X-Admin-Access".to_string(), "true".to_string())]),
            ..route("config", "/config", backend_url)
        },
        route("dead", "/api/dead", "http://127.0.0.1:1"),
    ]
}

pub fn test_config(backend_url: &str) -> Config {
    let source = EnvSource::from_pairs([
        ("JWT_SECRET", TEST_SECRET),
        ("JWT_ISSUER", "funbank"),
        ("REQUEST_TIMEOUT_MS", "5000"),
    ]);
    let mut config = Config::from_source(&source);
    config.jwt.secret = TEST_SECRET.to_string();
    config.jwt.secret_base64 = false;
    config.jwt.issuer = "funbank".to_string();
    config.redis.url = None;
    config.routes = test_routes(backend_url);
    config
}

pub fn test_state(config: Config) -> Arc<AppState> {
    test_state_with_store(config, Arc::new(InMemoryRateLimitStore::new()))
}

pub fn test_state_with_store(config: Config, store: Arc<dyn RateLimitStore>) -> Arc<AppState> {
    Arc::new(AppState::with_rate_limiter(Arc::new(config), store).expect("gateway state"))
}

/// 回显后端 + 网关路由
pub async fn test_app() -> (Router, Arc<AppState>, Backend) {
    test_app_with(|_| {}, Arc::new(InMemoryRateLimitStore::new())).await
}

/// 可调整配置并替换限流存储的版本
pub async fn test_app_with(
    configure: impl FnOnce(&mut Config),
    store: Arc<dyn RateLimitStore>,
) -> (Router, Arc<AppState>, Backend) {
    let backend = spawn_backend().await;
    let mut config = test_config(&backend.base_url);
    configure(&mut config);
    let state = test_state_with_store(config, store);
    (api::routes(state.clone()), state, backend)
}

/// 记录每次检查使用的限流键，实际计数交给内存存储
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemoryRateLimitStore,
    keys: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl RateLimitStore for RecordingStore {
    async fn try_acquire(
        &self,
        key: &str,
        spec: BucketSpec,
    ) -> Result<RateLimitDecision, RateLimitStoreError> {
        self.keys.lock().unwrap().push(key.to_string());
        self.inner.try_acquire(key, spec).await
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

/// 永不应答的限流存储
pub struct StalledStore;

#[async_trait]
impl RateLimitStore for StalledStore {
    async fn try_acquire(
        &self,
        _key: &str,
        _spec: BucketSpec,
    ) -> Result<RateLimitDecision, RateLimitStoreError> {
        std::future::pending().await
    }

    fn backend_name(&self) -> &'static str {
        "stalled"
    }
}

pub fn test_user() -> UserAuthentication {
    UserAuthentication {
        user_id: "user-42".to_string(),
        username: Some("alice".to_string()),
        roles: vec!["CUSTOMER".to_string(), "PREMIUM".to_string()],
        permissions: vec!["account:read".to_string(), "transfer:create".to_string()],
        session_id: Some("session-0123456789".to_string()),
        mfa_verified: true,
        ..Default::default()
    }
}

pub fn access_token(jwt: &JwtService) -> String {
    jwt.generate_access_token(&test_user()).expect("access token")
}

pub fn access_token_with_roles(jwt: &JwtService, roles: &[&str]) -> String {
    let user = UserAuthentication {
        roles: roles.iter().map(|r| r.to_string()).collect(),
        ..test_user()
    };
    jwt.generate_access_token(&user).expect("access token")
}

pub fn refresh_token(jwt: &JwtService) -> String {
    jwt.generate_refresh_token(&test_user()).expect("refresh token")
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    String::from_utf8_lossy(&bytes).into_owned()
}
