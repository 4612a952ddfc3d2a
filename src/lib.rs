//! 能源电网分析仪表盘的弹性与限流层
//!
//! 仪表盘对图数据库和文本分析 API 的每一次调用都经过这里：令牌桶限流、连接池、
//! 指数退避重试、TTL 缓存以及健康检查。

pub mod ai;
pub mod config;
pub mod core;
pub mod error;
pub mod graph;
pub mod logging;
pub mod services;
pub mod utils;

pub use crate::config::CoreConfig;
pub use crate::core::cache::{CacheManager, CacheStats};
pub use crate::core::health::{HealthChecker, HealthStatus, ServiceState};
pub use crate::core::middleware::{Admission, ServiceGuard};
pub use crate::core::pool::ConnectionPool;
pub use crate::core::rate_limit::{LimitsStatus, RateLimiter, TokenBucket};
pub use crate::core::retry::RetryHandler;
pub use crate::error::{GridError, Result};
pub use crate::services::CoreServices;
