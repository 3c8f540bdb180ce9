//! 网关热路径基准测试
//!
//! 每个请求都会经过的纯计算步骤：
//! 限流键计算、路径归一化、日志脱敏、令牌校验、进程内令牌桶

use std::{net::SocketAddr, sync::Arc};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use funbank_gateway::{
    config::{EnvSource, JwtConfig},
    domain::{determine_primary_role, normalize_path, resolve_key, RateLimitStrategy, RequestIdentity},
    infrastructure::{
        jwt::{JwtService, UserAuthentication},
        log_sanitizer::{mask_user_id, sanitize_path},
        rate_limit_store::{BucketSpec, InMemoryRateLimitStore, RateLimitStore},
    },
};
use tokio::runtime::Runtime;

const STRATEGIES: [RateLimitStrategy; 5] = [
    RateLimitStrategy::User,
    RateLimitStrategy::Ip,
    RateLimitStrategy::Path,
    RateLimitStrategy::Session,
    RateLimitStrategy::Role,
];

fn identity() -> RequestIdentity {
    RequestIdentity {
        user_id: Some("user-1234567".to_string()),
        session_id: Some("session-abcdef0123456789".to_string()),
        roles: Some("CUSTOMER,PREMIUM,EMPLOYEE".to_string()),
        client_ip: "203.0.113.7".to_string(),
        path: "/api/transactions/9876543210/status".to_string(),
    }
}

fn bench_rate_limit_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limit_key");
    let identity = identity();

    for strategy in STRATEGIES {
        group.bench_with_input(
            BenchmarkId::new("resolve_key", format!("{strategy:?}")),
            &strategy,
            |b, &strategy| b.iter(|| resolve_key(black_box(strategy), black_box(&identity))),
        );
    }

    group.bench_function("normalize_path", |b| {
        b.iter(|| normalize_path(black_box("/api/accounts/1234567890/statements")))
    });
    group.bench_function("determine_primary_role", |b| {
        b.iter(|| determine_primary_role(black_box("customer,staff,supervisor")))
    });
    group.finish();
}

fn bench_log_sanitizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_sanitizer");
    group.bench_function("sanitize_path", |b| {
        b.iter(|| {
            sanitize_path(black_box(
                "/api/accounts/12345678901234/transfers?accountNumber=9876543210&limit=20",
            ))
        })
    });
    group.bench_function("mask_user_id", |b| {
        b.iter(|| mask_user_id(black_box(Some("user-1234567"))))
    });
    group.finish();
}

fn bench_token_validation(c: &mut Criterion) {
    let config = JwtConfig {
        secret: "benchmark_secret_that_is_at_least_32_bytes".to_string(),
        secret_base64: false,
        ..JwtConfig::from_source(&EnvSource::default())
    };
    let jwt = JwtService::from_config(&config).expect("jwt service");
    let token = jwt
        .generate_access_token(&UserAuthentication {
            user_id: "user-1234567".to_string(),
            roles: vec!["CUSTOMER".to_string()],
            ..Default::default()
        })
        .expect("token");

    c.bench_function("validate_access_token", |b| {
        b.iter(|| jwt.validate_access_token(black_box(&token)))
    });
}

fn bench_in_memory_bucket(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let store = Arc::new(InMemoryRateLimitStore::new());
    let spec = BucketSpec {
        replenish_rate: 1_000_000,
        burst_capacity: 1_000_000,
    };
    let remote: SocketAddr = ([10, 0, 0, 1], 443).into();
    let key = format!("ip:{}", remote.ip());

    c.bench_function("in_memory_try_acquire", |b| {
        b.to_async(&rt)
            .iter(|| async { store.try_acquire(black_box(&key), spec).await })
    });
}

criterion_group!(
    benches,
    bench_rate_limit_keys,
    bench_log_sanitizer,
    bench_token_validation,
    bench_in_memory_bucket
);
criterion_main!(benches);
