//! 令牌桶限流存储
//!
//! 每次检查都是一次原子的「补充 + 判断 + 扣减」。
//! - `InMemoryRateLimitStore`：进程内，单副本部署可用
//! - `RedisRateLimitStore`（见 `cache.rs`）：Lua 脚本在 Redis 端完成，跨副本全局生效

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 令牌桶参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    /// 每秒补充的令牌数
    pub replenish_rate: u32,
    /// 桶容量；新桶满额
    pub burst_capacity: u32,
}

impl BucketSpec {
    /// 桶从空到满所需时间
    pub fn refill_window(&self) -> Duration {
        let rate = self.replenish_rate.max(1) as f64;
        Duration::from_secs_f64(self.burst_capacity as f64 / rate)
    }

    /// 被拒绝后建议的重试等待秒数（至少 1 秒）
    pub fn retry_after_secs(&self) -> u64 {
        let rate = self.replenish_rate.max(1) as f64;
        (1.0 / rate).ceil().max(1.0) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("unexpected store reply: {0}")]
    Protocol(String),
    #[error("store did not answer within {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// 原子地尝试从 `key` 对应的桶中取走一个令牌
    async fn try_acquire(
        &self,
        key: &str,
        spec: BucketSpec,
    ) -> Result<RateLimitDecision, RateLimitStoreError>;

    fn backend_name(&self) -> &'static str;
}

/// 带超时的令牌桶检查；存储卡住时按不可用处理，不阻塞请求
pub async fn acquire_with_timeout(
    store: &dyn RateLimitStore,
    key: &str,
    spec: BucketSpec,
    timeout: Duration,
) -> Result<RateLimitDecision, RateLimitStoreError> {
    match tokio::time::timeout(timeout, store.try_acquire(key, spec)).await {
        Ok(result) => result,
        Err(_) => Err(RateLimitStoreError::Timeout(timeout)),
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    // 按桶自身参数计算：闲置超过该时长即已回满，可以丢弃
    idle_after: Duration,
}

impl BucketState {
    fn full(spec: BucketSpec, now: Instant) -> Self {
        Self {
            tokens: spec.burst_capacity as f64,
            last_refill: now,
            idle_after: spec.refill_window(),
        }
    }

    fn refill(&mut self, spec: BucketSpec, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let refilled = self.tokens + elapsed * spec.replenish_rate as f64;
        self.tokens = refilled.min(spec.burst_capacity as f64);
        self.last_refill = now;
        self.idle_after = spec.refill_window();
    }

    fn is_idle(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_refill) >= self.idle_after
    }
}

/// 丢弃最久未使用的 `count` 个桶
fn evict_oldest(buckets: &mut HashMap<String, BucketState>, count: usize) {
    let count = count.min(buckets.len());
    if count == 0 {
        return;
    }
    let mut by_age: Vec<(Instant, String)> = buckets
        .iter()
        .map(|(key, b)| (b.last_refill, key.clone()))
        .collect();
    by_age.select_nth_unstable_by_key(count - 1, |(at, _)| *at);
    for (_, key) in by_age.into_iter().take(count) {
        buckets.remove(&key);
    }
}

/// 进程内令牌桶存储
#[derive(Debug)]
pub struct InMemoryRateLimitStore {
    buckets: Mutex<HashMap<String, BucketState>>,
    max_keys: usize,
}

impl Default for InMemoryRateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::with_max_keys(100_000)
    }

    /// 桶数量达到 `max_keys` 时先清理闲置的桶；仍然满时按最久未使用淘汰一批
    pub fn with_max_keys(max_keys: usize) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_keys: max_keys.max(1),
        }
    }

    pub fn tracked_keys(&self) -> usize {
        match self.buckets.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn acquire_at(&self, key: &str, spec: BucketSpec, now: Instant) -> RateLimitDecision {
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(), // 避免因锁污染导致 panic
        };

        if buckets.len() >= self.max_keys && !buckets.contains_key(key) {
            buckets.retain(|_, b| !b.is_idle(now));
            if buckets.len() >= self.max_keys {
                // 每次淘汰一成，避免活跃键打满时每个新键都全表扫描
                let batch = (self.max_keys / 10).max(1);
                let evict = buckets.len() + 1 - self.max_keys;
                evict_oldest(&mut buckets, evict.max(batch));
                tracing::warn!(
                    max_keys = self.max_keys,
                    "in-memory rate limit store full, evicted least recently used buckets"
                );
            }
        }

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| BucketState::full(spec, now));
        bucket.refill(spec, now);

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }
        RateLimitDecision {
            allowed,
            remaining: bucket.tokens.floor() as u64,
        }
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn try_acquire(
        &self,
        key: &str,
        spec: BucketSpec,
    ) -> Result<RateLimitDecision, RateLimitStoreError> {
        Ok(self.acquire_at(key, spec, Instant::now()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const SPEC: BucketSpec = BucketSpec {
        replenish_rate: 1,
        burst_capacity: 3,
    };

    #[test]
    fn test_fresh_bucket_allows_burst_then_rejects() {
        let store = InMemoryRateLimitStore::new();
        let now = Instant::now();
        let remaining: Vec<_> = (0..3)
            .map(|_| store.acquire_at("ip:10.0.0.1", SPEC, now))
            .map(|d| {
                assert!(d.allowed);
                d.remaining
            })
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let fourth = store.acquire_at("ip:10.0.0.1", SPEC, now);
        assert!(!fourth.allowed);
        assert_eq!(fourth.remaining, 0);
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let store = InMemoryRateLimitStore::new();
        let start = Instant::now();
        for _ in 0..3 {
            store.acquire_at("user:42", SPEC, start);
        }
        assert!(!store.acquire_at("user:42", SPEC, start).allowed);

        let later = start + Duration::from_millis(1100);
        assert!(store.acquire_at("user:42", SPEC, later).allowed);

        // 回满后不超过容量
        let much_later = later + Duration::from_secs(60);
        let d = store.acquire_at("user:42", SPEC, much_later);
        assert!(d.allowed);
        assert_eq!(d.remaining, 2);
    }

    #[test]
    fn test_keys_are_isolated() {
        let store = InMemoryRateLimitStore::new();
        let now = Instant::now();
        for _ in 0..3 {
            store.acquire_at("ip:1.1.1.1", SPEC, now);
        }
        assert!(!store.acquire_at("ip:1.1.1.1", SPEC, now).allowed);
        assert!(store.acquire_at("ip:2.2.2.2", SPEC, now).allowed);
    }

    #[test]
    fn test_idle_buckets_are_pruned() {
        let store = InMemoryRateLimitStore::with_max_keys(2);
        let start = Instant::now();
        store.acquire_at("a", SPEC, start);
        store.acquire_at("b", SPEC, start);
        assert_eq!(store.tracked_keys(), 2);

        store.acquire_at("c", SPEC, start + Duration::from_secs(10));
        assert_eq!(store.tracked_keys(), 1);
    }

    #[test]
    fn test_idle_check_uses_each_buckets_own_window() {
        let slow = BucketSpec {
            replenish_rate: 1,
            burst_capacity: 60,
        };
        let store = InMemoryRateLimitStore::with_max_keys(2);
        let start = Instant::now();
        store.acquire_at("slow", slow, start);
        store.acquire_at("fast", SPEC, start);

        // 10 秒后：fast（3 秒回满）已闲置，slow（60 秒回满）仍在恢复中
        store.acquire_at("new", SPEC, start + Duration::from_secs(10));
        let buckets = store.buckets.lock().unwrap();
        assert!(buckets.contains_key("slow"));
        assert!(!buckets.contains_key("fast"));
        assert!(buckets.contains_key("new"));
    }

    #[test]
    fn test_capacity_enforced_when_all_buckets_active() {
        let store = InMemoryRateLimitStore::with_max_keys(10);
        let start = Instant::now();
        for i in 0..10u64 {
            store.acquire_at(&format!("k{i}"), SPEC, start + Duration::from_millis(i));
        }
        assert_eq!(store.tracked_keys(), 10);

        let d = store.acquire_at("newcomer", SPEC, start + Duration::from_millis(10));
        assert!(d.allowed);
        assert_eq!(store.tracked_keys(), 10);
        {
            let buckets = store.buckets.lock().unwrap();
            assert!(!buckets.contains_key("k0"));
            assert!(buckets.contains_key("k9"));
            assert!(buckets.contains_key("newcomer"));
        }

        for i in 0..200u64 {
            store.acquire_at(&format!("flood{i}"), SPEC, start + Duration::from_millis(20 + i));
        }
        assert!(store.tracked_keys() <= 10);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_never_oversubscribes() {
        let store = Arc::new(InMemoryRateLimitStore::new());
        let spec = BucketSpec {
            replenish_rate: 1,
            burst_capacity: 20,
        };

        let handles = (0..50).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.try_acquire("user:race", spec).await.unwrap().allowed })
        });
        let allowed = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        // 测试期间最多补充 1~2 个令牌
        assert!((20..=22).contains(&allowed), "allowed = {allowed}");
    }

    struct StalledStore;

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

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let timeout = Duration::from_millis(30);
        let err = acquire_with_timeout(&StalledStore, "user:1", SPEC, timeout)
            .await
            .unwrap_err();
        assert!(matches!(err, RateLimitStoreError::Timeout(t) if t == timeout), "{err:?}");

        let ok = acquire_with_timeout(&InMemoryRateLimitStore::new(), "user:1", SPEC, timeout)
            .await
            .unwrap();
        assert!(ok.allowed);
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(SPEC.retry_after_secs(), 1);
        assert_eq!(SPEC.refill_window(), Duration::from_secs(3));
    }
}
