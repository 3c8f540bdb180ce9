//! 配置管理模块
//! 支持从环境变量、dotenv 文件和 TOML 配置文件加载网关配置
//!
//! 加载顺序：
//! 1. `GATEWAY_ENV_FILE` 指定的 dotenv 文件（只补充缺失的键，不覆盖真实环境变量）
//! 2. 环境变量（各配置段的 `Default` 实现）
//! 3. `CONFIG_PATH` 指定的 TOML 文件（存在时整体覆盖）

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
    time::Duration,
};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::{domain::rate_limit_key::RateLimitStrategy, infrastructure::rate_limit_store::BucketSpec};

/// 配置来源：真实环境变量 + 可选的 dotenv 覆盖层
///
/// 真实环境变量永远优先，dotenv 文件中的值只在环境变量缺失时生效。
/// 不会修改进程环境。
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    overlay: HashMap<String, String>,
}

impl EnvSource {
    /// 仅使用进程环境变量
    pub fn process() -> Self {
        Self::default()
    }

    /// 读取 dotenv 文件作为补充来源
    pub fn with_dotenv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut overlay = HashMap::new();
        let iter = dotenvy::from_path_iter(path.as_ref())
            .with_context(|| format!("Failed to open env file: {:?}", path.as_ref()))?;
        for item in iter {
            let (key, value) =
                item.with_context(|| format!("Malformed env file: {:?}", path.as_ref()))?;
            overlay.insert(key, value);
        }
        Ok(Self { overlay })
    }

    /// 构造测试用的来源（不读取文件）
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            overlay: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .or_else(|| self.overlay.get(key).cloned())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes"))
            .unwrap_or(default)
    }

    fn list(&self, key: &str, default: &str) -> Vec<String> {
        self.string(key, default)
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// 网关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub security_headers: SecurityHeadersConfig,
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// 后端请求的默认超时（毫秒），路由可单独覆盖
    pub request_timeout_ms: u64,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
    /// secret 是否为 base64 编码
    pub secret_base64: bool,
    pub issuer: String,
    pub access_token_expiry_secs: u64,
    pub refresh_token_expiry_secs: u64,
    /// 允许的时钟偏差（秒）
    pub leeway_secs: u64,
}

/// Redis配置；未配置 url 时使用进程内限流存储
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub key_prefix: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

/// 限流存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// 单次令牌桶检查的超时（毫秒），超时按存储不可用处理
    pub store_timeout_ms: u64,
    /// 网关前面还有一层可信网关时，采用其传播的 X-User-* 身份头
    pub trust_identity_headers: bool,
}

/// 审计日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub slow_request_threshold_ms: u64,
}

/// 安全响应头开关（默认全部开启）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityHeadersConfig {
    pub enable_hsts: bool,
    pub enable_content_type_options: bool,
    pub enable_frame_options: bool,
    pub enable_csp: bool,
    pub enable_referrer_policy: bool,
    pub enable_permissions_policy: bool,
    pub enable_cache_control: bool,
    pub enable_cross_origin_policies: bool,
    pub enable_banking_headers: bool,
    pub enable_pci_dss_headers: bool,
    pub remove_sensitive_headers: bool,
    pub server_name: String,
}

/// 路由配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub id: String,
    pub path_prefixes: Vec<String>,
    /// 后端实例地址，多个时轮询
    pub uris: Vec<String>,
    #[serde(default)]
    pub strip_prefix: usize,
    #[serde(default)]
    pub authenticate: bool,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
    /// 路由谓词：请求必须携带这些头且值相等
    #[serde(default)]
    pub required_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// 路由级限流配置（令牌桶）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub strategy: RateLimitStrategy,
    /// 每秒补充的令牌数
    pub replenish_rate: u32,
    /// 桶容量（允许的突发请求数）
    pub burst_capacity: u32,
}

impl RateLimitConfig {
    pub fn bucket(&self) -> BucketSpec {
        BucketSpec {
            replenish_rate: self.replenish_rate,
            burst_capacity: self.burst_capacity,
        }
    }
}

impl ServerConfig {
    pub fn from_source(src: &EnvSource) -> Self {
        Self {
            bind_addr: src.string("BIND_ADDR", "0.0.0.0:8080"),
            request_timeout_ms: src.parse("REQUEST_TIMEOUT_MS", 30_000),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl JwtConfig {
    pub fn from_source(src: &EnvSource) -> Self {
        Self {
            secret: src.string(
                "JWT_SECRET",
                "default-jwt-secret-please-change-in-production-min-32-chars",
            ),
            secret_base64: src.flag("JWT_SECRET_BASE64", false),
            issuer: src.string("JWT_ISSUER", "funbank"),
            access_token_expiry_secs: src.parse("JWT_EXPIRATION_SECS", 3600),
            refresh_token_expiry_secs: src.parse("JWT_REFRESH_EXPIRATION_SECS", 86400 * 7),
            leeway_secs: src.parse("JWT_LEEWAY_SECS", 0),
        }
    }

    /// 解析签名密钥字节
    pub fn secret_bytes(&self) -> Result<Vec<u8>> {
        if self.secret_base64 {
            BASE64
                .decode(self.secret.trim())
                .context("JWT_SECRET is not valid base64")
        } else {
            Ok(self.secret.as_bytes().to_vec())
        }
    }
}

impl RedisConfig {
    pub fn from_source(src: &EnvSource) -> Self {
        Self {
            url: src.get("REDIS_URL").filter(|s| !s.trim().is_empty()),
            key_prefix: src.string("RATE_LIMIT_KEY_PREFIX", "gateway:rate_limit"),
        }
    }
}

impl LoggingConfig {
    pub fn from_source(src: &EnvSource) -> Self {
        Self {
            level: src.string("LOG_LEVEL", "info"),
            format: src.string("LOG_FORMAT", "text"),
        }
    }
}

impl RateLimiterConfig {
    pub fn from_source(src: &EnvSource) -> Self {
        Self {
            store_timeout_ms: src.parse("RATE_LIMIT_STORE_TIMEOUT_MS", 200),
            trust_identity_headers: src.flag("RATE_LIMIT_TRUST_IDENTITY_HEADERS", false),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl AuditConfig {
    pub fn from_source(src: &EnvSource) -> Self {
        Self {
            slow_request_threshold_ms: src.parse("AUDIT_SLOW_REQUEST_MS", 10_000),
        }
    }

    pub fn slow_request_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_request_threshold_ms)
    }
}

impl SecurityHeadersConfig {
    pub fn from_source(src: &EnvSource) -> Self {
        Self {
            enable_hsts: src.flag("HSTS_ENABLE", true),
            enable_content_type_options: src.flag("SECURITY_CONTENT_TYPE_OPTIONS", true),
            enable_frame_options: src.flag("SECURITY_FRAME_OPTIONS", true),
            enable_csp: src.flag("SECURITY_CSP", true),
            enable_referrer_policy: src.flag("SECURITY_REFERRER_POLICY", true),
            enable_permissions_policy: src.flag("SECURITY_PERMISSIONS_POLICY", true),
            enable_cache_control: src.flag("SECURITY_CACHE_CONTROL", true),
            enable_cross_origin_policies: src.flag("SECURITY_CROSS_ORIGIN", true),
            enable_banking_headers: src.flag("SECURITY_BANKING_HEADERS", true),
            enable_pci_dss_headers: src.flag("SECURITY_PCI_DSS_HEADERS", true),
            remove_sensitive_headers: src.flag("SECURITY_REMOVE_SENSITIVE", true),
            server_name: src.string("GATEWAY_SERVER_NAME", "Funbank-Secure-Gateway"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_source(&EnvSource::process())
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self::from_source(&EnvSource::process())
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::from_source(&EnvSource::process())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::from_source(&EnvSource::process())
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::from_source(&EnvSource::process())
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self::from_source(&EnvSource::process())
    }
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self::from_source(&EnvSource::process())
    }
}

fn default_routes() -> Vec<RouteConfig> {
    routes_from_source(&EnvSource::process())
}

/// 默认路由表：用户/账户/交易/认证/配置中心
pub fn routes_from_source(src: &EnvSource) -> Vec<RouteConfig> {
    // 需要认证的业务路由共享同一组免认证路径
    let excluded = vec![
        "/api/auth/login".to_string(),
        "/api/auth/register".to_string(),
        "/api/auth/refresh".to_string(),
        "/oauth2/".to_string(),
        "/actuator/health".to_string(),
    ];

    vec![
        RouteConfig {
            id: "user-service".into(),
            path_prefixes: vec!["/api/users".into()],
            uris: src.list("USER_SERVICE_URL", "http://localhost:8083"),
            strip_prefix: 1,
            authenticate: true,
            excluded_paths: excluded.clone(),
            required_headers: BTreeMap::new(),
            rate_limit: Some(RateLimitConfig {
                strategy: RateLimitStrategy::User,
                replenish_rate: 10,
                burst_capacity: 20,
            }),
            timeout_ms: None,
        },
        RouteConfig {
            id: "account-service".into(),
            path_prefixes: vec!["/api/accounts".into()],
            uris: src.list("ACCOUNT_SERVICE_URL", "http://localhost:8084"),
            strip_prefix: 1,
            authenticate: true,
            excluded_paths: excluded.clone(),
            required_headers: BTreeMap::new(),
            rate_limit: Some(RateLimitConfig {
                strategy: RateLimitStrategy::User,
                replenish_rate: 10,
                burst_capacity: 20,
            }),
            timeout_ms: None,
        },
        RouteConfig {
            id: "transaction-service".into(),
            path_prefixes: vec!["/api/transactions".into()],
            uris: src.list("TRANSACTION_SERVICE_URL", "http://localhost:8085"),
            strip_prefix: 1,
            authenticate: true,
            excluded_paths: excluded,
            required_headers: BTreeMap::new(),
            rate_limit: Some(RateLimitConfig {
                strategy: RateLimitStrategy::Path,
                replenish_rate: 5,
                burst_capacity: 10,
            }),
            timeout_ms: None,
        },
        RouteConfig {
            id: "auth-service".into(),
            path_prefixes: vec!["/api/auth".into(), "/oauth2".into()],
            uris: src.list("AUTH_SERVICE_URL", "http://localhost:8082"),
            strip_prefix: 1,
            authenticate: false,
            excluded_paths: Vec::new(),
            required_headers: BTreeMap::new(),
            rate_limit: Some(RateLimitConfig {
                strategy: RateLimitStrategy::Ip,
                replenish_rate: 3,
                burst_capacity: 5,
            }),
            timeout_ms: None,
        },
        RouteConfig {
            id: "config-server".into(),
            path_prefixes: vec!["/config".into()],
            uris: src.list("CONFIG_SERVER_URL", "http://localhost:8888"),
            strip_prefix: 0,
            authenticate: true,
            excluded_paths: Vec::new(),
            required_headers: BTreeMap::from([("X-Admin-Access".to_string(), "true".to_string())]),
            rate_limit: None,
            timeout_ms: None,
        },
    ]
}

impl Config {
    /// 进程启动时调用一次：dotenv（可选）→ 环境变量 → 配置文件（可选）→ 校验
    pub fn load() -> Result<Self> {
        let source = match std::env::var("GATEWAY_ENV_FILE") {
            Ok(path) if !path.trim().is_empty() => EnvSource::with_dotenv(path.trim())?,
            _ => EnvSource::process(),
        };
        let config_path = source.get("CONFIG_PATH");
        let config = Self::from_source_and_file(&source, config_path.as_deref())?;
        config.validate()?;
        Ok(config)
    }

    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_source(&EnvSource::process()))
    }

    pub fn from_source(src: &EnvSource) -> Self {
        Self {
            server: ServerConfig::from_source(src),
            jwt: JwtConfig::from_source(src),
            redis: RedisConfig::from_source(src),
            logging: LoggingConfig::from_source(src),
            rate_limiter: RateLimiterConfig::from_source(src),
            audit: AuditConfig::from_source(src),
            security_headers: SecurityHeadersConfig::from_source(src),
            routes: routes_from_source(src),
        }
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        Self::from_source_and_file(&EnvSource::process(), path)
    }

    fn from_source_and_file<P: AsRef<Path>>(src: &EnvSource, path: Option<P>) -> Result<Self> {
        if let Some(path) = path {
            if path.as_ref().exists() {
                return Self::from_file(path);
            }
            tracing::warn!(path = ?path.as_ref(), "Config file not found, using environment");
        }
        Ok(Self::from_source(src))
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        let secret = self.jwt.secret_bytes()?;
        if secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 bytes");
        }
        if self.jwt.issuer.trim().is_empty() {
            anyhow::bail!("JWT_ISSUER must not be empty");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }
        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        if self.server.request_timeout_ms == 0 {
            anyhow::bail!("REQUEST_TIMEOUT_MS must be greater than zero");
        }
        if self.rate_limiter.store_timeout_ms == 0 {
            anyhow::bail!("RATE_LIMIT_STORE_TIMEOUT_MS must be greater than zero");
        }

        if self.routes.is_empty() {
            anyhow::bail!("at least one route must be configured");
        }
        let mut ids = HashSet::new();
        for route in &self.routes {
            if !ids.insert(route.id.as_str()) {
                anyhow::bail!("duplicate route id '{}'", route.id);
            }
            if route.path_prefixes.is_empty() {
                anyhow::bail!("route '{}' has no path prefixes", route.id);
            }
            if route.uris.is_empty() {
                anyhow::bail!("route '{}' has no backend uris", route.id);
            }
            for uri in &route.uris {
                if !uri.starts_with("http://") && !uri.starts_with("https://") {
                    anyhow::bail!("route '{}' uri '{}' must be http(s)", route.id, uri);
                }
            }
            if let Some(limit) = &route.rate_limit {
                if limit.replenish_rate == 0 || limit.burst_capacity == 0 {
                    anyhow::bail!(
                        "route '{}' rate limit needs replenish_rate and burst_capacity > 0",
                        route.id
                    );
                }
            }
            if route.timeout_ms == Some(0) {
                anyhow::bail!("route '{}' timeout_ms must be greater than zero", route.id);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const SECRET: &str = "test_secret_that_is_at_least_32_characters_long";

    #[test]
    fn test_config_from_source_defaults() {
        let src = EnvSource::from_pairs([("JWT_SECRET", SECRET)]);
        let config = Config::from_source(&src);
        assert_eq!(config.routes.len(), 5);
        assert!(config.security_headers.enable_hsts);
        assert_eq!(config.audit.slow_request_threshold_ms, 10_000);
        assert_eq!(config.rate_limiter.store_timeout_ms, 200);
        assert!(!config.rate_limiter.trust_identity_headers);

        let auth = config.routes.iter().find(|r| r.id == "auth-service").unwrap();
        assert!(!auth.authenticate);
        let limit = auth.rate_limit.unwrap();
        assert_eq!(limit.strategy, RateLimitStrategy::Ip);
        assert_eq!((limit.replenish_rate, limit.burst_capacity), (3, 5));
    }

    #[test]
    fn test_backend_url_list_is_split() {
        let src = EnvSource::from_pairs([(
            "TRANSACTION_SERVICE_URL",
            "http://tx-1:8080, http://tx-2:8080",
        )]);
        let routes = routes_from_source(&src);
        let tx = routes
            .iter()
            .find(|r| r.id == "transaction-service")
            .unwrap();
        // 真实环境变量优先；未设置时使用覆盖层的值
        if std::env::var("TRANSACTION_SERVICE_URL").is_err() {
            assert_eq!(tx.uris, vec!["http://tx-1:8080", "http://tx-2:8080"]);
        }
    }

    #[test]
    fn test_dotenv_overlay_does_not_touch_process_env() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "FUNBANK_TEST_ONLY_KEY=from-file").unwrap();

        let src = EnvSource::with_dotenv(file.path()).unwrap();
        assert_eq!(src.get("FUNBANK_TEST_ONLY_KEY").as_deref(), Some("from-file"));
        assert!(std::env::var("FUNBANK_TEST_ONLY_KEY").is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
bind_addr = "0.0.0.0:9090"
request_timeout_ms = 5000

[jwt]
secret = "{SECRET}"
issuer = "funbank"
access_token_expiry_secs = 3600
refresh_token_expiry_secs = 604800

[logging]
level = "debug"
format = "json"

[security_headers]
enable_hsts = false

[[routes]]
id = "user-service"
path_prefixes = ["/api/users"]
uris = ["http://127.0.0.1:9001", "http://127.0.0.1:9002"]
strip_prefix = 1
authenticate = true
excluded_paths = ["/api/users/public"]
rate_limit = {{ strategy = "role", replenish_rate = 4, burst_capacity = 8 }}
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:9090");
        assert_eq!(config.logging.format, "json");
        assert!(!config.security_headers.enable_hsts);
        assert!(config.security_headers.enable_csp);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].uris.len(), 2);
        assert_eq!(
            config.routes[0].rate_limit.unwrap().strategy,
            RateLimitStrategy::Role
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let src = EnvSource::from_pairs([("JWT_SECRET", SECRET)]);
        let mut config = Config::from_source(&src);
        config.jwt.secret = SECRET.to_string();
        config.logging.level = "info".into();
        config.logging.format = "text".into();
        assert!(config.validate().is_ok());

        config.jwt.secret = "short".into();
        assert!(config.validate().is_err());

        config.jwt.secret = SECRET.to_string();
        config.routes[0].rate_limit = Some(RateLimitConfig {
            strategy: RateLimitStrategy::User,
            replenish_rate: 0,
            burst_capacity: 1,
        });
        assert!(config.validate().is_err());

        config.routes[0].rate_limit = None;
        config.rate_limiter.store_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_base64_secret() {
        let mut jwt = JwtConfig::from_source(&EnvSource::default());
        jwt.secret = BASE64.encode(SECRET);
        jwt.secret_base64 = true;
        assert_eq!(jwt.secret_bytes().unwrap(), SECRET.as_bytes());

        jwt.secret = "***not-base64***".into();
        assert!(jwt.secret_bytes().is_err());
    }
}
