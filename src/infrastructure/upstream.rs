//! 后端转发客户端：连接池复用、整体超时、错误分类
//! 环境变量：
//! - UPSTREAM_POOL_IDLE_PER_HOST（默认 32）
//! - UPSTREAM_CONNECT_TIMEOUT_MS（默认 2000）

use std::{
    env,
    time::{Duration, Instant},
};

use axum::{
    body::Body,
    extract::Request,
    http::{header::CONTENT_LENGTH, HeaderMap, Response, StatusCode},
};
use futures::StreamExt;

use super::log_sanitizer::sanitize_path;

// 请求体上限
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

// 逐跳头不转发
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    #[error("bad upstream response: {0}")]
    BadGateway(String),
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
}

#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// 读取请求体，超过 `limit` 立即停止；声明的 Content-Length 超限时不读取
async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Vec<u8>, UpstreamError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(UpstreamError::PayloadTooLarge(limit));
    }

    let mut buf = Vec::new();
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|e| UpstreamError::BadGateway(format!("failed to read request body: {e}")))?;
        if buf.len() + chunk.len() > limit {
            return Err(UpstreamError::PayloadTooLarge(limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

impl UpstreamClient {
    pub fn new() -> anyhow::Result<Self> {
        let idle_per_host = env::var("UPSTREAM_POOL_IDLE_PER_HOST")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(32);
        let connect_timeout = env::var("UPSTREAM_CONNECT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(2000));

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client })
    }

    /// 转发请求到 `base_uri` + `path_and_query`；整个往返（含响应体）受 `timeout` 约束
    pub async fn forward(
        &self,
        base_uri: &str,
        path_and_query: &str,
        request: Request,
        timeout: Duration,
    ) -> Result<Response<Body>, UpstreamError> {
        let target_url = format!("{}{}", base_uri.trim_end_matches('/'), path_and_query);
        let start = Instant::now();

        let result = tokio::time::timeout(timeout, self.send(&target_url, request)).await;
        let elapsed_ms = start.elapsed().as_millis();

        match result {
            Ok(Ok(response)) => {
                crate::metrics::observe_upstream_latency_ms(elapsed_ms, true);
                Ok(response)
            }
            Ok(Err(UpstreamError::PayloadTooLarge(limit))) => {
                tracing::warn!(
                    base_uri = %base_uri,
                    path = %sanitize_path(path_and_query),
                    limit_bytes = limit,
                    "request body too large, not forwarded"
                );
                Err(UpstreamError::PayloadTooLarge(limit))
            }
            Ok(Err(e)) => {
                crate::metrics::observe_upstream_latency_ms(elapsed_ms, false);
                tracing::warn!(
                    base_uri = %base_uri,
                    path = %sanitize_path(path_and_query),
                    error = %e,
                    "upstream request failed"
                );
                Err(e)
            }
            Err(_) => {
                crate::metrics::observe_upstream_latency_ms(elapsed_ms, false);
                tracing::warn!(
                    base_uri = %base_uri,
                    path = %sanitize_path(path_and_query),
                    timeout_ms = timeout.as_millis() as u64,
                    "upstream request timed out"
                );
                Err(UpstreamError::Timeout(timeout))
            }
        }
    }

    async fn send(&self, target_url: &str, request: Request) -> Result<Response<Body>, UpstreamError> {
        let (parts, body) = request.into_parts();
        let body_bytes = read_body(&parts.headers, body, MAX_BODY_BYTES).await?;

        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|e| UpstreamError::BadGateway(e.to_string()))?;
        let mut builder = self.client.request(method, target_url);

        for (name, value) in parts.headers.iter() {
            if is_hop_by_hop(name.as_str()) || name.as_str().eq_ignore_ascii_case("content-length") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_bytes());
        }
        if !body_bytes.is_empty() {
            builder = builder.body(body_bytes);
        }

        let upstream = builder.send().await.map_err(classify)?;

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .map_err(|e| UpstreamError::BadGateway(e.to_string()))?;
        let mut response = Response::builder().status(status);
        for (name, value) in upstream.headers().iter() {
            if is_hop_by_hop(name.as_str()) || name.as_str().eq_ignore_ascii_case("content-length") {
                continue;
            }
            response = response.header(name.as_str(), value.as_bytes());
        }

        let bytes = upstream.bytes().await.map_err(classify)?;
        response
            .body(Body::from(bytes))
            .map_err(|e| UpstreamError::BadGateway(format!("failed to build response: {e}")))
    }
}

fn classify(err: reqwest::Error) -> UpstreamError {
    if err.is_connect() {
        UpstreamError::Unavailable(err.to_string())
    } else if err.is_timeout() {
        UpstreamError::Timeout(Duration::ZERO)
    } else {
        UpstreamError::BadGateway(err.to_string())
    }
}
