use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, OnceLock},
};

use crate::error::AppErrorCode;

static METRICS: OnceLock<Mutex<MetricsState>> = OnceLock::new();

// 未匹配路由的请求统一计入该标签
pub const UNROUTED: &str = "unrouted";

#[derive(Default)]
struct MetricsState {
    total: u64,
    errors: u64,
    per_route: BTreeMap<String, u64>,
    per_route_err: BTreeMap<String, u64>,
    // 网关自身拒绝（按内部错误码）
    rejections: BTreeMap<&'static str, u64>,
    security_events: BTreeMap<&'static str, u64>,
    rate_limit_store_failures: u64,
    // 上游成功/失败与时延统计（毫秒）
    upstream_ok: u64,
    upstream_err: u64,
    upstream_latency_sum_ms: u128,
    // 简易直方图分桶（毫秒）：<50, <100, <250, <500, <1000, >=1000
    upstream_hist_buckets: [u64; 6],
}

fn state() -> MutexGuard<'static, MetricsState> {
    let lock = METRICS.get_or_init(|| Mutex::new(MetricsState::default()));
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(), // 避免因锁污染导致 panic
    }
}

/// 记录一次完成的请求（状态码 >= 400 计为错误）
pub fn record_request(route_id: &str, status: u16) {
    let mut s = state();
    s.total += 1;
    *s.per_route.entry(route_id.to_string()).or_insert(0) += 1;
    if status >= 400 {
        s.errors += 1;
        *s.per_route_err.entry(route_id.to_string()).or_insert(0) += 1;
    }
}

pub fn record_rejection(code: AppErrorCode) {
    *state().rejections.entry(code.as_str()).or_insert(0) += 1;
}

pub fn record_security_event(event: &'static str) {
    *state().security_events.entry(event).or_insert(0) += 1;
}

pub fn inc_rate_limit_store_failure() {
    state().rate_limit_store_failures += 1;
}

pub fn observe_upstream_latency_ms(latency_ms: u128, ok: bool) {
    let mut s = state();
    if ok {
        s.upstream_ok += 1;
    } else {
        s.upstream_err += 1;
    }
    s.upstream_latency_sum_ms += latency_ms;
    let b = match latency_ms {
        0..=49 => 0,
        50..=99 => 1,
        100..=249 => 2,
        250..=499 => 3,
        500..=999 => 4,
        _ => 5,
    };
    s.upstream_hist_buckets[b] += 1;
}

pub fn render_prometheus() -> String {
    let s = state();
    let mut out = String::new();

    out.push_str("# HELP gateway_requests_total Total requests\n");
    out.push_str("# TYPE gateway_requests_total counter\n");
    out.push_str(&format!("gateway_requests_total {}\n", s.total));

    out.push_str("# HELP gateway_errors_total Responses with status >= 400\n");
    out.push_str("# TYPE gateway_errors_total counter\n");
    out.push_str(&format!("gateway_errors_total {}\n", s.errors));

    out.push_str("# HELP gateway_route_requests_total Requests per route\n");
    out.push_str("# TYPE gateway_route_requests_total counter\n");
    for (k, v) in s.per_route.iter() {
        out.push_str(&format!(
            "gateway_route_requests_total{{route=\"{}\"}} {}\n",
            k, v
        ));
    }

    out.push_str("# HELP gateway_route_errors_total Error responses per route\n");
    out.push_str("# TYPE gateway_route_errors_total counter\n");
    for (k, v) in s.per_route_err.iter() {
        out.push_str(&format!(
            "gateway_route_errors_total{{route=\"{}\"}} {}\n",
            k, v
        ));
    }

    out.push_str("# HELP gateway_rejections_total Requests rejected by the gateway\n");
    out.push_str("# TYPE gateway_rejections_total counter\n");
    for (k, v) in s.rejections.iter() {
        out.push_str(&format!("gateway_rejections_total{{code=\"{}\"}} {}\n", k, v));
    }

    out.push_str("# HELP gateway_security_events_total Security events emitted\n");
    out.push_str("# TYPE gateway_security_events_total counter\n");
    for (k, v) in s.security_events.iter() {
        out.push_str(&format!(
            "gateway_security_events_total{{event=\"{}\"}} {}\n",
            k, v
        ));
    }

    out.push_str("# HELP gateway_rate_limit_store_failures_total Rate limit checks that failed open\n");
    out.push_str("# TYPE gateway_rate_limit_store_failures_total counter\n");
    out.push_str(&format!(
        "gateway_rate_limit_store_failures_total {}\n",
        s.rate_limit_store_failures
    ));

    // 上游统计
    out.push_str("# HELP gateway_upstream_requests_total Upstream requests\n");
    out.push_str("# TYPE gateway_upstream_requests_total counter\n");
    out.push_str(&format!(
        "gateway_upstream_requests_total{{result=\"ok\"}} {}\n",
        s.upstream_ok
    ));
    out.push_str(&format!(
        "gateway_upstream_requests_total{{result=\"err\"}} {}\n",
        s.upstream_err
    ));

    out.push_str("# HELP gateway_upstream_latency_ms_sum Sum of upstream latency in ms\n");
    out.push_str("# TYPE gateway_upstream_latency_ms_sum counter\n");
    out.push_str(&format!(
        "gateway_upstream_latency_ms_sum {}\n",
        s.upstream_latency_sum_ms
    ));

    out.push_str("# HELP gateway_upstream_latency_ms_bucket Upstream latency histogram buckets\n");
    out.push_str("# TYPE gateway_upstream_latency_ms_bucket histogram\n");
    let bounds = [50, 100, 250, 500, 1000];
    let mut cumulative = 0u64;
    for (i, bound) in bounds.iter().enumerate() {
        cumulative += s.upstream_hist_buckets[i];
        out.push_str(&format!(
            "gateway_upstream_latency_ms_bucket{{le=\"{}\"}} {}\n",
            bound, cumulative
        ));
    }
    // +Inf 桶
    out.push_str(&format!(
        "gateway_upstream_latency_ms_bucket{{le=\"+Inf\"}} {}\n",
        s.upstream_hist_buckets.iter().sum::<u64>()
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_series() {
        record_request("metrics-test-route", 200);
        record_request("metrics-test-route", 503);
        record_rejection(AppErrorCode::TokenExpired);
        record_security_event("SLOW_REQUEST");
        observe_upstream_latency_ms(120, true);

        let text = render_prometheus();
        assert!(text.contains("gateway_route_requests_total{route=\"metrics-test-route\"}"));
        assert!(text.contains("gateway_route_errors_total{route=\"metrics-test-route\"}"));
        assert!(text.contains("gateway_rejections_total{code=\"TOKEN_EXPIRED\"}"));
        assert!(text.contains("gateway_security_events_total{event=\"SLOW_REQUEST\"}"));
        assert!(text.contains("gateway_upstream_latency_ms_bucket{le=\"+Inf\"}"));
    }
}
