use super::{AnalysisClient, AnalysisRequest, AnalysisResponse};
use crate::core::middleware::{Admission, ServiceGuard};
use crate::error::{ApiError, ApiResult};
use std::sync::Arc;
use tracing::{info, warn};

/// 在任意分析客户端外面加上限流和重试
///
/// 每次调用只做一次准入检查，令牌数按请求输入估算；认证和请求格式错误不重试。
pub struct GuardedAnalysisClient {
    inner: Arc<dyn AnalysisClient>,
    guard: ServiceGuard,
}

impl GuardedAnalysisClient {
    pub fn new(inner: Arc<dyn AnalysisClient>, guard: ServiceGuard) -> Self {
        Self { inner, guard }
    }

    pub fn model(&self) -> &str {
        self.inner.model()
    }

    pub fn analyze(
        &self,
        caller_id: Option<&str>,
        request: &AnalysisRequest,
    ) -> ApiResult<Admission<AnalysisResponse>> {
        let tokens = request.estimated_tokens();
        let admission = self.guard.call_when(
            caller_id,
            tokens,
            || self.inner.analyze(request),
            ApiError::is_retryable,
        )?;

        match &admission {
            Admission::Granted(response) => info!(
                model = %response.model,
                input_tokens = response.input_tokens,
                output_tokens = response.output_tokens,
                "Analysis request completed"
            ),
            Admission::Throttled { .. } => warn!(
                caller = caller_id.unwrap_or("-"),
                tokens_required = tokens,
                "Analysis request throttled"
            ),
        }
        Ok(admission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, RetryPolicy};
    use crate::core::clock::ManualClock;
    use crate::core::rate_limit::RateLimiter;
    use crate::core::retry::RetryHandler;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct ScriptedClient {
        replies: Mutex<VecDeque<ApiResult<AnalysisResponse>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<ApiResult<AnalysisResponse>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            })
        }
    }

    impl AnalysisClient for ScriptedClient {
        fn analyze(&self, _request: &AnalysisRequest) -> ApiResult<AnalysisResponse> {
            *self.calls.lock() += 1;
            self.replies
                .lock()
                .pop_front()
                .unwrap_or(Err(ApiError::Unavailable("script exhausted".into())))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn response() -> AnalysisResponse {
        AnalysisResponse {
            text: "Transformer T-4 shows elevated risk".into(),
            model: "scripted".into(),
            input_tokens: 12,
            output_tokens: 8,
            stop_reason: Some("end_turn".into()),
        }
    }

    fn guarded(client: Arc<ScriptedClient>, tokens_per_minute: u32) -> GuardedAnalysisClient {
        let limiter = RateLimiter::new(
            RateLimitConfig {
                requests_per_minute: 10,
                requests_per_day: 100,
                tokens_per_minute,
            },
            Arc::new(ManualClock::default()),
        );
        let retry = RetryHandler::from_policy(&RetryPolicy {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
            ..RetryPolicy::default()
        });
        GuardedAnalysisClient::new(client, ServiceGuard::new(Arc::new(limiter), Arc::new(retry)))
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let client = ScriptedClient::new(vec![
            Err(ApiError::RateLimited("slow down".into())),
            Err(ApiError::Timeout),
            Ok(response()),
        ]);
        let guarded = guarded(client.clone(), 1000);

        let result = guarded
            .analyze(None, &AnalysisRequest::new("summarize risk"))
            .unwrap();
        assert_eq!(result.granted(), Some(response()));
        assert_eq!(*client.calls.lock(), 3);
    }

    #[test]
    fn test_auth_failure_is_not_retried() {
        let client = ScriptedClient::new(vec![Err(ApiError::AuthFailed("invalid x-api-key".into()))]);
        let guarded = guarded(client.clone(), 1000);

        let err = guarded
            .analyze(None, &AnalysisRequest::new("summarize risk"))
            .unwrap_err();
        assert!(matches!(err, ApiError::AuthFailed(_)));
        assert_eq!(*client.calls.lock(), 1);
    }

    #[test]
    fn test_large_prompt_is_throttled_by_token_quota() {
        let client = ScriptedClient::new(vec![Ok(response())]);
        let guarded = guarded(client.clone(), 10);

        let result = guarded
            .analyze(None, &AnalysisRequest::new("x".repeat(400)))
            .unwrap();
        assert!(!result.is_granted());
        assert_eq!(*client.calls.lock(), 0);
    }
}
