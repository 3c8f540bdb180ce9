//! 路由表：路径前缀 → 后端服务
//!
//! 启动时由配置构建一次，之后只读共享。

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use axum::http::{HeaderMap, HeaderName};
use regex::Regex;

use crate::config::{RateLimitConfig, RouteConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path is not absolute")]
    Malformed,
    #[error("path contains a dot segment")]
    DotSegment,
    #[error("path contains an encoded separator or dot")]
    EncodedSeparator,
}

/// 规范化请求路径：合并空段，保留结尾斜杠
///
/// `.`/`..` 段、反斜杠以及 `%2e`/`%2f`/`%5c` 编码直接拒绝，不做解析。
/// 路由匹配、免认证判断与转发都使用同一个结果。
pub fn normalize_request_path(path: &str) -> Result<String, PathError> {
    if !path.starts_with('/') {
        return Err(PathError::Malformed);
    }
    if path.contains('\\') {
        return Err(PathError::EncodedSeparator);
    }
    let lower = path.to_ascii_lowercase();
    if ["%2e", "%2f", "%5c"].iter().any(|enc| lower.contains(enc)) {
        return Err(PathError::EncodedSeparator);
    }

    let mut out = String::with_capacity(path.len());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(PathError::DotSegment);
        }
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() || path.ends_with('/') {
        out.push('/');
    }
    Ok(out)
}

/// 请求扩展：路径被规范化拒绝，由转发处理器返回 400
#[derive(Debug, Clone, Copy)]
pub struct RejectedPath(pub PathError);

/// 免认证路径模式：前缀匹配或整体正则匹配，任一命中即可
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    prefix: String,
    regex: Option<Regex>,
}

impl PathPattern {
    pub fn new(raw: &str) -> Self {
        // 兼容 "/api/public/**" 写法
        let prefix = raw.strip_suffix("/**").unwrap_or(raw).to_string();
        // 不是合法正则的模式只做前缀匹配
        let regex = Regex::new(&format!("^(?:{})$", raw)).ok();
        Self {
            raw: raw.to_string(),
            prefix,
            regex,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix) || self.regex.as_ref().is_some_and(|r| r.is_match(path))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExcludedPaths(Vec<PathPattern>);

impl ExcludedPaths {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self(patterns.iter().map(|p| PathPattern::new(p.as_ref())).collect())
    }

    /// 返回命中的第一个模式
    pub fn find(&self, path: &str) -> Option<&PathPattern> {
        self.0.iter().find(|p| p.matches(path))
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.find(path).is_some()
    }
}

#[derive(Debug)]
pub struct Route {
    pub id: String,
    path_prefixes: Vec<String>,
    uris: Vec<String>,
    strip_prefix: usize,
    pub authenticate: bool,
    pub excluded_paths: ExcludedPaths,
    required_headers: Vec<(HeaderName, String)>,
    pub rate_limit: Option<RateLimitConfig>,
    pub timeout: Duration,
    next_uri: AtomicUsize,
}

impl Route {
    pub fn from_config(config: &RouteConfig, default_timeout: Duration) -> Result<Self> {
        let required_headers = config
            .required_headers
            .iter()
            .map(|(name, value)| {
                HeaderName::from_bytes(name.as_bytes())
                    .with_context(|| format!("route '{}': invalid header name '{}'", config.id, name))
                    .map(|n| (n, value.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id: config.id.clone(),
            path_prefixes: config
                .path_prefixes
                .iter()
                .map(|p| {
                    let trimmed = p.trim_end_matches("/**").trim_end_matches('/');
                    if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() }
                })
                .collect(),
            uris: config.uris.clone(),
            strip_prefix: config.strip_prefix,
            authenticate: config.authenticate,
            excluded_paths: ExcludedPaths::new(&config.excluded_paths),
            required_headers,
            rate_limit: config.rate_limit,
            timeout: config
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(default_timeout),
            next_uri: AtomicUsize::new(0),
        })
    }

    fn matches_path(&self, path: &str) -> bool {
        self.path_prefixes.iter().any(|prefix| {
            prefix == "/"
                || path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    fn matches_headers(&self, headers: &HeaderMap) -> bool {
        self.required_headers.iter().all(|(name, expected)| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == expected)
        })
    }

    pub fn matches(&self, path: &str, headers: &HeaderMap) -> bool {
        self.matches_path(path) && self.matches_headers(headers)
    }

    /// 去掉前 `strip_prefix` 个路径段
    pub fn strip_path(&self, path: &str) -> String {
        let stripped: Vec<&str> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .skip(self.strip_prefix)
            .collect();
        let mut out = format!("/{}", stripped.join("/"));
        if path.ends_with('/') && out.len() > 1 {
            out.push('/');
        }
        out
    }

    /// 多实例轮询
    pub fn next_uri(&self) -> &str {
        let idx = self.next_uri.fetch_add(1, Ordering::Relaxed) % self.uris.len();
        &self.uris[idx]
    }
}

/// 请求扩展：路由匹配结果，后续阶段共享
#[derive(Debug, Clone)]
pub struct MatchedRoute(pub Arc<Route>);

#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn from_config(routes: &[RouteConfig], default_timeout: Duration) -> Result<Self> {
        let routes = routes
            .iter()
            .filter(|r| !r.uris.is_empty())
            .map(|r| Route::from_config(r, default_timeout).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { routes })
    }

    /// 按配置顺序取第一个匹配的路由
    pub fn resolve(&self, path: &str, headers: &HeaderMap) -> Option<Arc<Route>> {
        self.routes.iter().find(|r| r.matches(path, headers)).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
