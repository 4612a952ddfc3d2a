use crate::config::{LogFormat, LoggingConfig};
use crate::error::ConfigError;
use tracing::{Span, info_span};
use tracing_subscriber::EnvFilter;

/// 安装全局订阅器，`RUST_LOG` 优先于配置中的级别
///
/// 返回携带服务名和环境的根 span，调用方在主线程上 `enter` 它。
pub fn init_logging(config: &LoggingConfig) -> Result<Span, ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));

    let installed = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(false)
            .try_init(),
    };
    installed.map_err(|e| ConfigError::Invalid(format!("failed to install logger: {}", e)))?;

    Ok(info_span!(
        "service",
        service_name = %config.service_name,
        environment = %config.environment
    ))
}
