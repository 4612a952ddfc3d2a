//! 进程级服务容器：所有组件只构建一次，通过 `Arc` 传递

use crate::ai::{AnalysisClient, GuardedAnalysisClient, HttpAnalysisClient};
use crate::config::{CoreConfig, validator};
use crate::core::cache::CacheManager;
use crate::core::clock::SystemClock;
use crate::core::health::{AiApiProbe, EnvironmentProbe, GraphDatabaseProbe, HealthChecker};
use crate::core::middleware::{ServiceGuard, cached_call};
use crate::core::perf::TracingPerformanceLogger;
use crate::core::pool::ConnectionPool;
use crate::core::rate_limit::RateLimiter;
use crate::core::retry::RetryHandler;
use crate::core::traits::{Clock, PerformanceRecorder};
use crate::error::{GridError, Result};
use crate::graph::{GraphDriver, Parameters, Record};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct CoreServices {
    pub config: CoreConfig,
    pub clock: Arc<dyn Clock>,
    pub recorder: Arc<dyn PerformanceRecorder>,
    pub rate_limiter: Arc<RateLimiter>,
    pub retry: Arc<RetryHandler>,
    pub cache: Arc<CacheManager<Value>>,
    pub query_cache: Arc<CacheManager<Vec<Record>>>,
    pub pool: Arc<ConnectionPool>,
    pub ai: Arc<GuardedAnalysisClient>,
    pub health: Arc<HealthChecker>,
}

impl CoreServices {
    /// 校验配置后构建 HTTP 图数据库驱动和 AI 客户端
    pub fn from_config(config: CoreConfig) -> Result<Self> {
        validator::validate(&config)?;

        let clock = SystemClock::shared();
        let recorder: Arc<dyn PerformanceRecorder> = Arc::new(TracingPerformanceLogger::new());

        let pool = ConnectionPool::from_config(
            &config.database,
            &config.pool,
            &config.health,
            recorder.clone(),
            clock.clone(),
        )?;
        let ai_client = HttpAnalysisClient::with_recorder(&config.ai, recorder.clone())?;

        Ok(Self::assemble(config, Arc::new(pool), Arc::new(ai_client), recorder, clock))
    }

    /// 使用外部提供的驱动和客户端构建，其余组件按配置创建
    pub fn with_parts(
        config: CoreConfig,
        driver: Arc<dyn GraphDriver>,
        ai_client: Arc<dyn AnalysisClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let recorder: Arc<dyn PerformanceRecorder> = Arc::new(TracingPerformanceLogger::new());
        let pool = ConnectionPool::builder(driver)
            .database(&config.database.database)
            .pool_config(config.pool.clone())
            .health_interval(config.health.interval())
            .recorder(recorder.clone())
            .clock(clock.clone())
            .build();

        Self::assemble(config, Arc::new(pool), ai_client, recorder, clock)
    }

    fn assemble(
        config: CoreConfig,
        pool: Arc<ConnectionPool>,
        ai_client: Arc<dyn AnalysisClient>,
        recorder: Arc<dyn PerformanceRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), clock.clone()));
        let retry = Arc::new(RetryHandler::from_policy(&config.retry));
        let cache = Arc::new(CacheManager::new(&config.cache, clock.clone()));
        let query_cache = Arc::new(CacheManager::new(&config.cache, clock.clone()));

        let guard = ServiceGuard::new(rate_limiter.clone(), retry.clone());
        let ai = Arc::new(GuardedAnalysisClient::new(ai_client.clone(), guard));

        let health = Arc::new(
            HealthChecker::new(config.health.interval(), clock.clone())
                .with_probe(Arc::new(GraphDatabaseProbe::new(pool.clone())))
                .with_probe(Arc::new(AiApiProbe::new(ai_client, config.ai.api_key.clone())))
                .with_probe(Arc::new(EnvironmentProbe::new(config.clone()))),
        );

        info!(
            service = %config.logging.service_name,
            environment = %config.logging.environment,
            endpoint = %pool.endpoint(),
            "Core services initialized"
        );

        Self {
            config,
            clock,
            recorder,
            rate_limiter,
            retry,
            cache,
            query_cache,
            pool,
            ai,
            health,
        }
    }

    pub fn guard(&self) -> ServiceGuard {
        ServiceGuard::new(self.rate_limiter.clone(), self.retry.clone())
    }

    /// 查询失败时按重试策略重试，致命错误立即返回
    pub fn query_with_retry(&self, query: &str, parameters: &Parameters) -> Result<Vec<Record>> {
        self.retry.execute_with_retry_when(
            || self.pool.execute_query(query, parameters),
            GridError::is_retryable,
        )
    }

    /// 带缓存的查询，键由语句和参数派生
    pub fn cached_query(
        &self,
        query: &str,
        parameters: &Parameters,
        ttl: Option<Duration>,
    ) -> Result<Vec<Record>> {
        cached_call(
            &self.query_cache,
            "execute_query",
            &[json!(query)],
            parameters,
            ttl,
            || self.query_with_retry(query, parameters),
        )
    }

    pub fn shutdown(&self) {
        self.pool.close();
        info!("Core services shut down");
    }
}
