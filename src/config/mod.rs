pub mod validator;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// 核心配置：由仪表盘在进程启动时构建一次
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    pub database: DatabaseConfig,
    pub ai: AiConfig,
    pub rate_limit: RateLimitConfig,
    pub pool: PoolConfig,
    pub retry: RetryPolicy,
    pub cache: CacheConfig,
    pub health: HealthConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub uri: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub api_version: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
    pub tokens_per_minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub max_pool_size: usize,
    pub connection_timeout_secs: u64,
    pub acquisition_timeout_secs: u64,
    pub max_connection_lifetime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    /// 0.0 表示不加抖动
    pub jitter_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    pub max_cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// 连接池探测与健康检查器共用
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub service_name: String,
    pub environment: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: "neo4j://localhost:7687".to_string(),
            username: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            api_version: "2023-06-01".to_string(),
            max_tokens: 4096,
            timeout_secs: 60,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 50,
            requests_per_day: 10_000,
            tokens_per_minute: 50_000,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 50,
            connection_timeout_secs: 30,
            acquisition_timeout_secs: 60,
            max_connection_lifetime_secs: 3600,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
            jitter_ratio: 0.0,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            max_cache_size: 100,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            service_name: "energy-grid-agent".to_string(),
            environment: "production".to_string(),
        }
    }
}

// 凭据不进入日志
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("uri", &self.uri)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("database", &self.database)
            .finish()
    }
}

impl fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "<unset>" } else { "<redacted>" }
}

impl PoolConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn acquisition_timeout(&self) -> Duration {
        Duration::from_secs(self.acquisition_timeout_secs)
    }

    pub fn max_connection_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_connection_lifetime_secs)
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(LogLevel::Off),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(ConfigError::Invalid(format!("Unknown log level: {}", other))),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Invalid(format!("Unknown log format: {}", other))),
        }
    }
}

impl CoreConfig {
    /// 从 YAML 文件加载，缺失字段使用默认值
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFailed)?;
        let config: CoreConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(e.to_string()))?;

        info!(path = %path.display(), "已加载配置文件");
        Ok(config)
    }

    /// 从进程环境变量读取
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 按部署约定的变量名读取配置，未设置的项保留默认值
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = CoreConfig::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("NEO4J_URI") {
            config.database.uri = v;
        }
        if let Some(v) = get("NEO4J_USERNAME") {
            config.database.username = v;
        }
        if let Some(v) = get("NEO4J_PASSWORD") {
            config.database.password = v;
        }
        if let Some(v) = get("NEO4J_DATABASE") {
            config.database.database = v;
        }
        parse_into(&get, "NEO4J_MAX_POOL_SIZE", &mut config.pool.max_pool_size)?;
        parse_into(&get, "NEO4J_CONNECTION_TIMEOUT", &mut config.pool.connection_timeout_secs)?;
        parse_into(&get, "NEO4J_ACQUISITION_TIMEOUT", &mut config.pool.acquisition_timeout_secs)?;
        parse_into(&get, "NEO4J_MAX_LIFETIME", &mut config.pool.max_connection_lifetime_secs)?;

        if let Some(v) = get("CLAUDE_API_KEY") {
            config.ai.api_key = v;
        }
        if let Some(v) = get("CLAUDE_MODEL") {
            config.ai.model = v;
        }
        parse_into(&get, "CLAUDE_MAX_TOKENS", &mut config.ai.max_tokens)?;
        parse_into(&get, "CLAUDE_RPM", &mut config.rate_limit.requests_per_minute)?;
        parse_into(&get, "CLAUDE_RPD", &mut config.rate_limit.requests_per_day)?;
        parse_into(&get, "CLAUDE_TPM", &mut config.rate_limit.tokens_per_minute)?;
        parse_into(&get, "CLAUDE_MAX_RETRIES", &mut config.retry.max_retries)?;
        parse_into(&get, "CLAUDE_BACKOFF_FACTOR", &mut config.retry.backoff_factor)?;

        // 原部署中的重试延迟以秒为单位（可为小数）
        if let Some(v) = get("CLAUDE_RETRY_DELAY") {
            let secs: f64 = v.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("CLAUDE_RETRY_DELAY: cannot parse '{}'", v))
            })?;
            if !secs.is_finite() || secs < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "CLAUDE_RETRY_DELAY must be a non-negative number, got {}",
                    v
                )));
            }
            config.retry.base_delay_ms = (secs * 1000.0).round() as u64;
        }

        parse_into(&get, "CACHE_TTL", &mut config.cache.default_ttl_secs)?;
        parse_into(&get, "CACHE_MAX_SIZE", &mut config.cache.max_cache_size)?;
        parse_into(&get, "HEALTH_CHECK_INTERVAL", &mut config.health.health_check_interval_secs)?;

        if let Some(v) = get("LOG_LEVEL") {
            config.logging.level = v.parse()?;
        }
        if let Some(v) = get("LOG_FORMAT") {
            config.logging.format = v.parse()?;
        }
        if let Some(v) = get("SERVICE_NAME") {
            config.logging.service_name = v;
        }
        if let Some(v) = get("ENVIRONMENT") {
            config.logging.environment = v;
        }

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.logging.environment == "production"
    }
}

fn parse_into<T, G>(get: &G, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{}: cannot parse '{}'", key, raw)))?;
    }
    Ok(())
}
