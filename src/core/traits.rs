use crate::core::health::HealthStatus;
use std::fmt::Debug;
use std::time::{Duration, Instant};

/// 时间源 trait，限流、缓存和健康检查都通过它取时间
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;
}

/// 重试策略 trait
pub trait RetryStrategy: Send + Sync {
    /// 第 attempt 次失败（从 0 开始）之后的等待时间
    fn delay_before_retry(&self, attempt: u32) -> Duration;
    fn max_retries(&self) -> u32;
}

/// 健康探测 trait，实现方不得返回错误，失败必须转换为 error 状态
pub trait HealthProbe: Send + Sync {
    /// 结果映射中的键，例如 "neo4j"、"claude"、"environment"
    fn service_key(&self) -> &str;
    fn probe(&self) -> HealthStatus;
}

/// 性能记录 trait
pub trait PerformanceRecorder: Send + Sync {
    fn record_query(&self, query: &str, elapsed: Duration, success: bool, rows: Option<usize>);

    fn record_api_call(
        &self,
        service: &str,
        endpoint: &str,
        elapsed: Duration,
        success: bool,
        status_code: Option<u16>,
    );

    fn record_function(&self, name: &str, elapsed: Duration, success: bool, error: Option<&str>);
}
