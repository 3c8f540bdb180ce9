//! Redis 令牌桶：补充、判断、扣减在一个 Lua 脚本内完成
//! 使用 ConnectionManager 自动重连，多个网关副本共享同一组桶

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::rate_limit_store::{
    BucketSpec, RateLimitDecision, RateLimitStore, RateLimitStoreError,
};

// 时间取自 Redis 服务端 TIME，避免副本间时钟偏差
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local requested = tonumber(ARGV[3])

local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)

local state = redis.call('HMGET', key, 'tokens', 'ts')
local tokens = tonumber(state[1])
local ts = tonumber(state[2])
if tokens == nil or ts == nil then
    tokens = capacity
    ts = now
end

local elapsed = math.max(0, now - ts)
tokens = math.min(capacity, tokens + (elapsed * rate) / 1000)

local allowed = 0
if tokens >= requested then
    tokens = tokens - requested
    allowed = 1
end

redis.call('HSET', key, 'tokens', tostring(tokens), 'ts', tostring(now))
redis.call('PEXPIRE', key, math.ceil(capacity / rate * 2000) + 1000)

return { allowed, math.floor(tokens) }
"#;

#[derive(Clone)]
pub struct RedisRateLimitStore {
    conn: ConnectionManager,
    script: redis::Script,
    key_prefix: String,
}

impl RedisRateLimitStore {
    pub async fn connect(redis_url: &str, key_prefix: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            script: redis::Script::new(TOKEN_BUCKET_SCRIPT),
            key_prefix: key_prefix.trim_end_matches(':').to_string(),
        })
    }

    pub async fn ping(&self) -> Result<String, redis::RedisError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong)
    }

    /// 限流键统一加前缀，业务键对存储不透明
    pub fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn try_acquire(
        &self,
        key: &str,
        spec: BucketSpec,
    ) -> Result<RateLimitDecision, RateLimitStoreError> {
        let mut conn = self.conn.clone();
        let reply: Vec<i64> = self
            .script
            .key(self.namespaced(key))
            .arg(spec.replenish_rate)
            .arg(spec.burst_capacity)
            .arg(1)
            .invoke_async(&mut conn)
            .await?;

        match reply.as_slice() {
            [allowed, remaining] => Ok(RateLimitDecision {
                allowed: *allowed == 1,
                remaining: (*remaining).max(0) as u64,
            }),
            other => Err(RateLimitStoreError::Protocol(format!(
                "expected [allowed, remaining], got {other:?}"
            ))),
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
