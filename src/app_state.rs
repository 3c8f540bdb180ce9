use std::sync::Arc;

use crate::{
    api::middleware::security_headers::SecurityHeaders,
    config::Config,
    domain::route::RouteTable,
    infrastructure::{
        cache::RedisRateLimitStore,
        jwt::JwtService,
        rate_limit_store::{InMemoryRateLimitStore, RateLimitStore},
        upstream::UpstreamClient,
    },
};

/// 应用状态
/// 启动时构建一次，所有请求只读共享；唯一的可变状态在限流存储内部
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub routes: Arc<RouteTable>,
    pub jwt: Arc<JwtService>,
    pub rate_limiter: Arc<dyn RateLimitStore>,
    pub upstream: Arc<UpstreamClient>,
    pub security_headers: Arc<SecurityHeaders>,
}

impl AppState {
    /// 创建应用状态；配置了 REDIS_URL 时使用 Redis 限流，否则退化为进程内限流
    pub async fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let rate_limiter: Arc<dyn RateLimitStore> = match &config.redis.url {
            Some(url) => {
                let store = RedisRateLimitStore::connect(url, &config.redis.key_prefix).await?;
                tracing::info!(backend = "redis", "✅ Rate limit store connected");
                Arc::new(store)
            }
            None => {
                tracing::warn!(
                    backend = "memory",
                    "REDIS_URL not set: rate limits are enforced per gateway replica only"
                );
                Arc::new(InMemoryRateLimitStore::new())
            }
        };
        Self::with_rate_limiter(config, rate_limiter)
    }

    /// 使用指定的限流存储创建应用状态（测试与基准使用）
    pub fn with_rate_limiter(
        config: Arc<Config>,
        rate_limiter: Arc<dyn RateLimitStore>,
    ) -> anyhow::Result<Self> {
        let routes = Arc::new(RouteTable::from_config(
            &config.routes,
            config.server.request_timeout(),
        )?);
        let jwt = Arc::new(JwtService::from_config(&config.jwt)?);
        let upstream = Arc::new(UpstreamClient::new()?);
        let security_headers = Arc::new(SecurityHeaders::from_config(&config.security_headers));

        tracing::info!(
            routes = routes.len(),
            rate_limit_backend = rate_limiter.backend_name(),
            "gateway state initialized"
        );

        Ok(Self {
            config,
            routes,
            jwt,
            rate_limiter,
            upstream,
            security_headers,
        })
    }
}
