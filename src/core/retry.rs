use super::traits::RetryStrategy;
use crate::config::RetryPolicy;
use rand::Rng;
use std::fmt::Display;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    jitter_ratio: f64,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::from_policy(&RetryPolicy::default())
    }

    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            base_delay: policy.base_delay(),
            max_delay: policy.max_delay(),
            backoff_factor: policy.backoff_factor,
            jitter_ratio: policy.jitter_ratio,
        }
    }

    pub fn builder() -> ExponentialBackoffBuilder {
        ExponentialBackoffBuilder::new()
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let jitter = rand::rng().random_range(-self.jitter_ratio..self.jitter_ratio);
        Duration::from_secs_f64((delay.as_secs_f64() * (1.0 + jitter)).max(0.0))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn delay_before_retry(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()).max(0.0));
        self.add_jitter(capped)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

// 构建器模式
pub struct ExponentialBackoffBuilder {
    max_retries: Option<u32>,
    base_delay: Option<Duration>,
    max_delay: Option<Duration>,
    backoff_factor: Option<f64>,
    jitter_ratio: Option<f64>,
}

impl ExponentialBackoffBuilder {
    pub fn new() -> Self {
        Self {
            max_retries: None,
            base_delay: None,
            max_delay: None,
            backoff_factor: None,
            jitter_ratio: None,
        }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = Some(factor);
        self
    }

    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = Some(ratio);
        self
    }

    pub fn build(self) -> ExponentialBackoff {
        ExponentialBackoff {
            max_retries: self.max_retries.unwrap_or(3),
            base_delay: self.base_delay.unwrap_or(Duration::from_secs(1)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(60)),
            backoff_factor: self.backoff_factor.unwrap_or(2.0),
            jitter_ratio: self.jitter_ratio.unwrap_or(0.0),
        }
    }
}

impl Default for ExponentialBackoffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 带指数退避的重试执行器
///
/// 被包装的操作可能被调用多次，调用方需保证其幂等或可容忍重复执行。
/// 等待使用阻塞的 `thread::sleep`。
pub struct RetryHandler {
    strategy: Box<dyn RetryStrategy>,
}

impl RetryHandler {
    pub fn new(strategy: impl RetryStrategy + 'static) -> Self {
        Self {
            strategy: Box::new(strategy),
        }
    }

    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self::new(ExponentialBackoff::from_policy(policy))
    }

    pub fn max_retries(&self) -> u32 {
        self.strategy.max_retries()
    }

    /// 任何错误都重试，耗尽后原样返回最后一次的错误
    pub fn execute_with_retry<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: Display,
    {
        self.execute_with_retry_when(operation, |_| true)
    }

    /// 仅当 `should_retry` 返回 true 时重试，否则立即返回该错误
    pub fn execute_with_retry_when<T, E, F, P>(&self, mut operation: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_retries = self.strategy.max_retries();
        let mut attempt = 0u32;

        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !should_retry(&err) {
                        error!(attempt = attempt + 1, error = %err, "Operation failed with non-retryable error");
                        return Err(err);
                    }

                    if attempt >= max_retries {
                        error!(max_retries, error = %err, "Max retries exceeded");
                        return Err(err);
                    }

                    let delay = self.strategy.delay_before_retry(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast_handler(max_retries: u32) -> RetryHandler {
        RetryHandler::new(
            ExponentialBackoff::builder()
                .max_retries(max_retries)
                .base_delay(Duration::from_millis(10))
                .build(),
        )
    }

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let backoff = ExponentialBackoff::builder()
            .base_delay(Duration::from_millis(100))
            .backoff_factor(2.0)
            .max_delay(Duration::from_millis(500))
            .build();

        assert_eq!(backoff.delay_before_retry(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_before_retry(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_before_retry(2), Duration::from_millis(400));
        assert_eq!(backoff.delay_before_retry(3), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let backoff = ExponentialBackoff::builder()
            .base_delay(Duration::from_millis(1000))
            .jitter_ratio(0.1)
            .build();

        for _ in 0..20 {
            let delay = backoff.delay_before_retry(0);
            assert!(delay >= Duration::from_millis(900) && delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn test_succeeds_after_two_failures() {
        let calls = Cell::new(0);
        let result: Result<&str, String> = fast_handler(2).execute_with_retry(|| {
            calls.set(calls.get() + 1);
            if calls.get() <= 2 {
                Err(format!("failure {}", calls.get()))
            } else {
                Ok("done")
            }
        });

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_returns_original_error_when_exhausted() {
        let calls = Cell::new(0);
        let result: Result<(), String> = fast_handler(2).execute_with_retry(|| {
            calls.set(calls.get() + 1);
            Err(format!("failure {}", calls.get()))
        });

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_zero_retries_runs_once() {
        let calls = Cell::new(0);
        let result: Result<(), &str> = fast_handler(0).execute_with_retry(|| {
            calls.set(calls.get() + 1);
            Err("boom")
        });
        assert_eq!(result, Err("boom"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_predicate_stops_on_fatal_error() {
        let calls = Cell::new(0);
        let result: Result<(), &str> = fast_handler(5).execute_with_retry_when(
            || {
                calls.set(calls.get() + 1);
                Err("auth failed")
            },
            |e| !e.starts_with("auth"),
        );
        assert_eq!(result, Err("auth failed"));
        assert_eq!(calls.get(), 1);
    }
}
