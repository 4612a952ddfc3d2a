use super::clock::SystemClock;
use super::health::{HealthStatus, ServiceState};
use super::perf::{TracingPerformanceLogger, query_type};
use super::traits::{Clock, PerformanceRecorder};
use crate::config::{DatabaseConfig, HealthConfig, PoolConfig};
use crate::error::{ConfigError, GraphError, GridError, Result};
use crate::graph::{GraphDriver, GraphSession, HttpGraphDriver, Parameters, QueryResult, Record};
use parking_lot::{Condvar, Mutex, RwLock};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub const HEALTH_QUERY: &str = "RETURN 1 AS health_check";
pub const GRAPH_SERVICE_NAME: &str = "Neo4j Database";

/// 图数据库连接池
///
/// 驱动句柄只能通过 [`ConnectionPool::acquire_session`] 借出，会话守卫在任何退出路径上都会归还许可。
pub struct ConnectionPool {
    config: PoolConfig,
    database: String,
    endpoint: String,
    driver: RwLock<Option<Arc<dyn GraphDriver>>>,
    in_use: Mutex<usize>,
    released: Condvar,
    recorder: Arc<dyn PerformanceRecorder>,
    clock: Arc<dyn Clock>,
    health_interval: Duration,
    last_health: Mutex<Option<(Instant, HealthStatus)>>,
    probe_lock: Mutex<()>,
}

impl ConnectionPool {
    pub fn builder(driver: Arc<dyn GraphDriver>) -> ConnectionPoolBuilder {
        ConnectionPoolBuilder::new(driver)
    }

    /// 检查凭证并创建 HTTP 驱动
    pub fn from_config(
        database: &DatabaseConfig,
        pool: &PoolConfig,
        health: &HealthConfig,
        recorder: Arc<dyn PerformanceRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if database.uri.trim().is_empty() {
            return Err(ConfigError::MissingField("database.uri".into()).into());
        }
        if database.username.trim().is_empty() {
            return Err(ConfigError::MissingField("database.username".into()).into());
        }
        if database.password.is_empty() {
            return Err(ConfigError::MissingField("database.password".into()).into());
        }

        let driver = HttpGraphDriver::new(database, pool)?;
        Ok(Self::builder(Arc::new(driver))
            .database(&database.database)
            .pool_config(pool.clone())
            .health_interval(health.interval())
            .recorder(recorder)
            .clock(clock)
            .build())
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn max_size(&self) -> usize {
        self.config.max_pool_size.max(1)
    }

    pub fn in_use(&self) -> usize {
        *self.in_use.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.driver.read().is_none()
    }

    /// 借出一个会话；池满时最多等待 acquisition_timeout
    pub fn acquire_session(&self) -> Result<SessionGuard<'_>> {
        let driver = self.driver.read().clone().ok_or(GridError::PoolClosed)?;
        self.acquire_permit()?;

        match driver.session(&self.database) {
            Ok(session) => {
                let guard = SessionGuard {
                    pool: self,
                    session,
                    id: Uuid::new_v4(),
                    acquired_at: Instant::now(),
                };
                debug!(session_id = %guard.id, in_use = self.in_use(), "会话已借出");
                Ok(guard)
            }
            Err(e) => {
                self.release_permit();
                Err(e.into())
            }
        }
    }

    fn acquire_permit(&self) -> Result<()> {
        let timeout = self.config.acquisition_timeout();
        // 超时大到无法表示时不设期限
        let deadline = Instant::now().checked_add(timeout);
        let max = self.max_size();

        let mut in_use = self.in_use.lock();
        while *in_use >= max {
            if self.is_closed() {
                return Err(GridError::PoolClosed);
            }
            let Some(deadline) = deadline else {
                self.released.wait(&mut in_use);
                continue;
            };
            let result = self.released.wait_until(&mut in_use, deadline);
            if result.timed_out() && *in_use >= max {
                if self.is_closed() {
                    return Err(GridError::PoolClosed);
                }
                warn!(
                    max_pool_size = max,
                    timeout_secs = timeout.as_secs_f64(),
                    "等待连接池会话超时"
                );
                return Err(GridError::AcquisitionTimeout(timeout));
            }
        }
        *in_use += 1;
        Ok(())
    }

    fn release_permit(&self) {
        let mut in_use = self.in_use.lock();
        *in_use = in_use.saturating_sub(1);
        drop(in_use);
        self.released.notify_one();
    }

    /// 执行查询并记录耗时和行数，失败原样返回，不做隐式重试
    #[instrument(skip(self, query, parameters), fields(query_type = query_type(query)))]
    pub fn execute_query(&self, query: &str, parameters: &Parameters) -> Result<Vec<Record>> {
        let start = Instant::now();
        let outcome = self
            .acquire_session()
            .and_then(|mut session| session.run(query, parameters));
        let elapsed = start.elapsed();

        match outcome {
            Ok(result) => {
                let records = result.into_records();
                self.recorder
                    .record_query(query, elapsed, true, Some(records.len()));
                Ok(records)
            }
            Err(e) => {
                error!(error = %e, elapsed_ms = elapsed.as_millis() as u64, "查询执行失败");
                self.recorder.record_query(query, elapsed, false, None);
                Err(e)
            }
        }
    }

    /// 启动时验证连通性，成功后写入健康状态缓存
    pub fn verify_connectivity(&self) -> Result<()> {
        let status = self.probe();
        let outcome = match &status.error_message {
            Some(message) if status.status == ServiceState::Error => {
                error!(endpoint = %self.endpoint, error = %message, "图数据库连通性验证失败");
                Err(GraphError::ServiceUnavailable(message.clone()).into())
            }
            _ => {
                info!(endpoint = %self.endpoint, database = %self.database, "图数据库连通性验证成功");
                Ok(())
            }
        };
        *self.last_health.lock() = Some((self.clock.now(), status));
        outcome
    }

    /// 间隔内返回缓存的状态，否则重新探测；从不返回错误
    pub fn health_check(&self) -> HealthStatus {
        if let Some(status) = self.cached_health() {
            return status;
        }

        let _probe = self.probe_lock.lock();
        // 其它线程可能已经刷新
        if let Some(status) = self.cached_health() {
            return status;
        }

        let status = self.probe();
        *self.last_health.lock() = Some((self.clock.now(), status.clone()));
        status
    }

    fn cached_health(&self) -> Option<HealthStatus> {
        let now = self.clock.now();
        self.last_health
            .lock()
            .as_ref()
            .filter(|(checked_at, _)| now.saturating_duration_since(*checked_at) < self.health_interval)
            .map(|(_, status)| status.clone())
    }

    fn probe(&self) -> HealthStatus {
        let start = Instant::now();
        let outcome = self
            .acquire_session()
            .and_then(|mut session| session.run(HEALTH_QUERY, &Parameters::new()));
        let elapsed = start.elapsed();

        match outcome {
            Ok(_) => HealthStatus::new(GRAPH_SERVICE_NAME, ServiceState::Healthy, elapsed)
                .with_detail("endpoint", json!(self.endpoint))
                .with_detail("database", json!(self.database))
                .with_detail("sessions_in_use", json!(self.in_use()))
                .with_detail("max_pool_size", json!(self.max_size())),
            Err(e) => {
                warn!(error = %e, "连接池健康探测失败");
                HealthStatus::new(GRAPH_SERVICE_NAME, ServiceState::Error, elapsed)
                    .with_error(e.to_string())
            }
        }
    }

    /// 释放驱动，可重复调用
    pub fn close(&self) {
        let driver = self.driver.write().take();
        match driver {
            Some(driver) => {
                driver.close();
                info!(endpoint = %self.endpoint, "连接池已关闭");
            }
            None => debug!("连接池已经关闭"),
        }
        // 持锁通知，等待者检查 is_closed 后到挂起前不会错过唤醒
        let _in_use = self.in_use.lock();
        self.released.notify_all();
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.close();
    }
}

/// 作用域会话，drop 时归还许可
pub struct SessionGuard<'a> {
    pool: &'a ConnectionPool,
    session: Box<dyn GraphSession>,
    id: Uuid,
    acquired_at: Instant,
}

impl SessionGuard<'_> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn run(&mut self, query: &str, parameters: &Parameters) -> Result<QueryResult> {
        Ok(self.session.run(query, parameters)?)
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.pool.release_permit();
        debug!(
            session_id = %self.id,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "会话已归还"
        );
    }
}

// 构建器模式
pub struct ConnectionPoolBuilder {
    driver: Arc<dyn GraphDriver>,
    database: String,
    config: PoolConfig,
    health_interval: Duration,
    recorder: Option<Arc<dyn PerformanceRecorder>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ConnectionPoolBuilder {
    pub fn new(driver: Arc<dyn GraphDriver>) -> Self {
        Self {
            driver,
            database: "neo4j".to_string(),
            config: PoolConfig::default(),
            health_interval: HealthConfig::default().interval(),
            recorder: None,
            clock: None,
        }
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn PerformanceRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> ConnectionPool {
        let endpoint = self.driver.endpoint();
        ConnectionPool {
            config: self.config,
            database: self.database,
            endpoint,
            driver: RwLock::new(Some(self.driver)),
            in_use: Mutex::new(0),
            released: Condvar::new(),
            recorder: self
                .recorder
                .unwrap_or_else(|| Arc::new(TracingPerformanceLogger::new())),
            clock: self.clock.unwrap_or_else(SystemClock::shared),
            health_interval: self.health_interval,
            last_health: Mutex::new(None),
            probe_lock: Mutex::new(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::error::GraphResult;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingDriver {
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    struct CountingSession {
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    impl GraphDriver for CountingDriver {
        fn session(&self, _database: &str) -> GraphResult<Box<dyn GraphSession>> {
            Ok(Box::new(CountingSession {
                runs: Arc::clone(&self.runs),
                fail: self.fail,
            }))
        }

        fn endpoint(&self) -> String {
            "memory://test".into()
        }
    }

    impl GraphSession for CountingSession {
        fn run(&mut self, _query: &str, _parameters: &Parameters) -> GraphResult<QueryResult> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GraphError::ServiceUnavailable("connection refused".into()));
            }
            Ok(QueryResult::new(vec!["n".into()], vec![vec![Value::from(1)]]))
        }
    }

    #[derive(Default)]
    struct RecordingRecorder {
        queries: Mutex<Vec<(bool, Option<usize>)>>,
    }

    impl PerformanceRecorder for RecordingRecorder {
        fn record_query(&self, _q: &str, _e: Duration, success: bool, rows: Option<usize>) {
            self.queries.lock().push((success, rows));
        }
        fn record_api_call(&self, _: &str, _: &str, _: Duration, _: bool, _: Option<u16>) {}
        fn record_function(&self, _: &str, _: Duration, _: bool, _: Option<&str>) {}
    }

    fn pool_with(driver: CountingDriver, clock: ManualClock, max: usize) -> ConnectionPool {
        pool_waiting(driver, clock, max, 0)
    }

    fn pool_waiting(
        driver: CountingDriver,
        clock: ManualClock,
        max: usize,
        acquisition_timeout_secs: u64,
    ) -> ConnectionPool {
        ConnectionPool::builder(Arc::new(driver))
            .pool_config(PoolConfig {
                max_pool_size: max,
                acquisition_timeout_secs,
                ..PoolConfig::default()
            })
            .health_interval(Duration::from_secs(300))
            .clock(Arc::new(clock))
            .build()
    }

    #[test]
    fn test_execute_query_records_rows() {
        let recorder = Arc::new(RecordingRecorder::default());
        let pool = ConnectionPool::builder(Arc::new(CountingDriver::default()))
            .recorder(recorder.clone())
            .build();

        let records = pool
            .execute_query("MATCH (n) RETURN n", &Parameters::new())
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["n"], Value::from(1));
        assert_eq!(*recorder.queries.lock(), vec![(true, Some(1))]);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_failed_query_is_recorded_and_propagated() {
        let recorder = Arc::new(RecordingRecorder::default());
        let pool = ConnectionPool::builder(Arc::new(CountingDriver {
            fail: true,
            ..Default::default()
        }))
        .recorder(recorder.clone())
        .build();

        let err = pool
            .execute_query("MATCH (n) RETURN n", &Parameters::new())
            .unwrap_err();
        assert!(matches!(err, GridError::Graph(GraphError::ServiceUnavailable(_))));
        assert_eq!(*recorder.queries.lock(), vec![(false, None)]);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_acquisition_times_out_when_exhausted() {
        let pool = pool_with(CountingDriver::default(), ManualClock::default(), 1);
        let held = pool.acquire_session().unwrap();
        assert!(matches!(
            pool.acquire_session(),
            Err(GridError::AcquisitionTimeout(_))
        ));
        drop(held);
        assert!(pool.acquire_session().is_ok());
    }

    #[test]
    fn test_close_wakes_waiting_acquirer() {
        let pool = pool_waiting(CountingDriver::default(), ManualClock::default(), 1, 60);
        let held = pool.acquire_session().unwrap();

        let started = Instant::now();
        let waited = std::thread::scope(|scope| {
            let waiter = scope.spawn(|| pool.acquire_session().map(|_| ()));
            std::thread::sleep(Duration::from_millis(50));
            pool.close();
            waiter.join().unwrap()
        });

        assert!(matches!(waited, Err(GridError::PoolClosed)));
        assert!(started.elapsed() < Duration::from_secs(30));
        drop(held);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_unbounded_acquisition_timeout_waits_for_release() {
        let pool = pool_waiting(CountingDriver::default(), ManualClock::default(), 1, u64::MAX);
        let held = pool.acquire_session().unwrap();

        let acquired = std::thread::scope(|scope| {
            let waiter = scope.spawn(|| pool.acquire_session().map(|_| ()));
            std::thread::sleep(Duration::from_millis(50));
            drop(held);
            waiter.join().unwrap()
        });

        assert!(acquired.is_ok());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_session_released_on_panic() {
        let pool = pool_with(CountingDriver::default(), ManualClock::default(), 1);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _session = pool.acquire_session().unwrap();
            panic!("caller panicked while holding a session");
        }));
        assert!(result.is_err());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_health_check_is_throttled() {
        let runs = Arc::new(AtomicUsize::new(0));
        let clock = ManualClock::default();
        let pool = pool_with(
            CountingDriver {
                runs: Arc::clone(&runs),
                fail: false,
            },
            clock.clone(),
            2,
        );

        let first = pool.health_check();
        assert_eq!(first.status, ServiceState::Healthy);
        let second = pool.health_check();
        assert_eq!(first, second);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(300));
        pool.health_check();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_health_check_never_fails() {
        let pool = pool_with(
            CountingDriver {
                fail: true,
                ..Default::default()
            },
            ManualClock::default(),
            2,
        );
        let status = pool.health_check();
        assert_eq!(status.status, ServiceState::Error);
        assert!(status.error_message.unwrap().contains("connection refused"));
        assert!(pool.verify_connectivity().is_err());
    }

    #[test]
    fn test_close_is_idempotent() {
        let pool = pool_with(CountingDriver::default(), ManualClock::default(), 2);
        pool.close();
        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.acquire_session(), Err(GridError::PoolClosed)));
        assert_eq!(pool.health_check().status, ServiceState::Error);
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let database = DatabaseConfig {
            password: String::new(),
            ..DatabaseConfig::default()
        };
        let result = ConnectionPool::from_config(
            &database,
            &PoolConfig::default(),
            &HealthConfig::default(),
            Arc::new(TracingPerformanceLogger::new()),
            SystemClock::shared(),
        );
        assert!(matches!(
            result,
            Err(GridError::Config(ConfigError::MissingField(_)))
        ));
    }
}
