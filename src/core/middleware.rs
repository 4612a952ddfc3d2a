//! 组合限流、重试、缓存和计时的包装函数

use super::cache::{CacheManager, EstimateSize, cache_key};
use super::rate_limit::{LimitsStatus, RateLimiter};
use super::retry::RetryHandler;
use super::traits::PerformanceRecorder;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

pub const THROTTLED_MESSAGE: &str =
    "Rate limit exceeded. Please wait a moment before making another request.";

/// 准入结果：被本地限流拒绝不是错误
#[derive(Debug, Clone, PartialEq)]
pub enum Admission<T> {
    Granted(T),
    Throttled { message: String, limits: LimitsStatus },
}

impl<T> Admission<T> {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted(_))
    }

    pub fn granted(self) -> Option<T> {
        match self {
            Admission::Granted(value) => Some(value),
            Admission::Throttled { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Admission<U> {
        match self {
            Admission::Granted(value) => Admission::Granted(f(value)),
            Admission::Throttled { message, limits } => Admission::Throttled { message, limits },
        }
    }
}

/// 先限流再重试
#[derive(Clone)]
pub struct ServiceGuard {
    limiter: Arc<RateLimiter>,
    retry: Arc<RetryHandler>,
}

impl ServiceGuard {
    pub fn new(limiter: Arc<RateLimiter>, retry: Arc<RetryHandler>) -> Self {
        Self { limiter, retry }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn call<T, E, F>(&self, caller_id: Option<&str>, tokens_required: u32, operation: F) -> Result<Admission<T>, E>
    where
        F: FnMut() -> Result<T, E>,
        E: Display,
    {
        self.call_when(caller_id, tokens_required, operation, |_| true)
    }

    /// 准入一次后，按 `should_retry` 决定是否重试失败的调用
    pub fn call_when<T, E, F, P>(
        &self,
        caller_id: Option<&str>,
        tokens_required: u32,
        operation: F,
        should_retry: P,
    ) -> Result<Admission<T>, E>
    where
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        if !self.limiter.check_rate_limit(caller_id, tokens_required) {
            return Ok(Admission::Throttled {
                message: THROTTLED_MESSAGE.to_string(),
                limits: self.limiter.get_limits_status(caller_id),
            });
        }

        self.retry
            .execute_with_retry_when(operation, should_retry)
            .map(Admission::Granted)
    }
}

/// 执行并记录函数耗时
pub fn timed<T, E, F>(name: &str, recorder: &dyn PerformanceRecorder, operation: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: Display,
{
    let start = Instant::now();
    let result = operation();
    let elapsed = start.elapsed();

    match &result {
        Ok(_) => recorder.record_function(name, elapsed, true, None),
        Err(e) => {
            let message = e.to_string();
            warn!(function = name, error = %message, "Function failed");
            recorder.record_function(name, elapsed, false, Some(&message));
        }
    }
    result
}

/// 以操作名和参数派生缓存键，命中直接返回，否则计算后写入
pub fn cached_call<V, E, F>(
    cache: &CacheManager<V>,
    operation: &str,
    args: &[Value],
    kwargs: &BTreeMap<String, Value>,
    ttl: Option<Duration>,
    compute: F,
) -> Result<V, E>
where
    V: Clone + EstimateSize,
    F: FnOnce() -> Result<V, E>,
{
    let key = cache_key(operation, args, kwargs);
    cache.get_or_compute(&key, ttl, compute)
}
