use crate::config::CoreConfig;
use crate::error::ConfigError;

/// 校验配置是否可用，返回第一个错误
pub fn validate(config: &CoreConfig) -> Result<(), ConfigError> {
    if config.database.uri.trim().is_empty() {
        return Err(ConfigError::MissingField("database.uri".into()));
    }

    if config.database.database.trim().is_empty() {
        return Err(ConfigError::MissingField("database.database".into()));
    }

    // 验证限流配置
    let limits = &config.rate_limit;
    if limits.requests_per_minute == 0 {
        return Err(ConfigError::Invalid(
            "Requests per minute must be greater than 0".into(),
        ));
    }
    if limits.tokens_per_minute == 0 {
        return Err(ConfigError::Invalid(
            "Tokens per minute must be greater than 0".into(),
        ));
    }
    if limits.requests_per_day == 0 {
        return Err(ConfigError::Invalid(
            "Requests per day must be greater than 0".into(),
        ));
    }

    // 验证连接池
    if config.pool.max_pool_size == 0 {
        return Err(ConfigError::Invalid(
            "Max pool size must be greater than 0".into(),
        ));
    }
    if config.pool.connection_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "Connection timeout must be greater than 0".into(),
        ));
    }

    // 验证重试策略
    let retry = &config.retry;
    if !retry.backoff_factor.is_finite() || retry.backoff_factor < 1.0 {
        return Err(ConfigError::Invalid(format!(
            "Backoff factor must be >= 1.0, got {}",
            retry.backoff_factor
        )));
    }
    if !(0.0..1.0).contains(&retry.jitter_ratio) {
        return Err(ConfigError::Invalid(format!(
            "Jitter ratio must be in [0, 1), got {}",
            retry.jitter_ratio
        )));
    }
    if retry.max_delay_ms < retry.base_delay_ms {
        return Err(ConfigError::Invalid(
            "Max retry delay cannot be smaller than the base delay".into(),
        ));
    }

    if config.cache.max_cache_size == 0 {
        return Err(ConfigError::Invalid(
            "Max cache size must be greater than 0".into(),
        ));
    }

    if config.ai.max_tokens == 0 {
        return Err(ConfigError::Invalid("AI max tokens must be greater than 0".into()));
    }

    Ok(())
}

/// 列出缺失的凭据（不影响 validate 的结果，启动时用于提示）
pub fn missing_secrets(config: &CoreConfig) -> Vec<String> {
    let mut missing = Vec::new();

    if config.database.uri.trim().is_empty() {
        missing.push("NEO4J_URI is required".to_string());
    }
    if config.database.password.is_empty() {
        missing.push("NEO4J_PASSWORD is required".to_string());
    }
    if config.ai.api_key.is_empty() {
        missing.push("CLAUDE_API_KEY is required".to_string());
    }

    missing
}
