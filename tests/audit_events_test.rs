//! 审计事件集成测试
//! 捕获 tracing 输出，检查网关合成错误时上报的安全事件

mod common;

use std::{
    io,
    sync::{Arc, Mutex},
};

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use funbank_gateway::infrastructure::rate_limit_store::InMemoryRateLimitStore;
use tower::ServiceExt;

use common::*;

#[derive(Clone, Default)]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl CaptureWriter {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_subscriber(writer: CaptureWriter) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .finish()
}

#[tokio::test]
async fn test_gateway_timeout_reports_upstream_timeout_and_slow_request() {
    let writer = CaptureWriter::default();
    let _guard = tracing::subscriber::set_default(capture_subscriber(writer.clone()));

    let (app, state, _backend) = test_app_with(
        |config| config.audit.slow_request_threshold_ms = 100,
        Arc::new(InMemoryRateLimitStore::new()),
    )
    .await;
    let token = access_token(&state.jwt);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/accounts/123456789012/slow?accountNumber=987654321098")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

    let logs = writer.contents();
    assert!(logs.contains("SECURITY_EVENT UPSTREAM_TIMEOUT"), "{logs}");
    assert!(logs.contains("SECURITY_EVENT SLOW_REQUEST"), "{logs}");
    assert!(logs.contains("upstream request timed out"), "{logs}");
    // 账号只以脱敏形式出现
    assert!(!logs.contains("123456789012"), "{logs}");
    assert!(!logs.contains("987654321098"), "{logs}");
    assert!(logs.contains("***MASKED***"), "{logs}");
}

#[tokio::test]
async fn test_unrouted_request_reports_no_upstream_timeout() {
    let writer = CaptureWriter::default();
    let _guard = tracing::subscriber::set_default(capture_subscriber(writer.clone()));

    let (app, _state, _backend) = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/unknown/path")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let logs = writer.contents();
    assert!(logs.contains("RESPONSE"), "{logs}");
    assert!(!logs.contains("UPSTREAM_TIMEOUT"), "{logs}");
}
