use super::pool::{ConnectionPool, GRAPH_SERVICE_NAME, HEALTH_QUERY};
use super::resources::ResourceUsage;
use super::traits::{Clock, HealthProbe};
use crate::ai::{AnalysisClient, AnalysisRequest, validate_api_key};
use crate::config::{CoreConfig, validator};
use crate::graph::Parameters;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub const AI_SERVICE_NAME: &str = "Claude AI API";
pub const ENVIRONMENT_SERVICE_NAME: &str = "Runtime Environment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Healthy,
    Warning,
    Error,
    Unknown,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Healthy => "healthy",
            ServiceState::Warning => "warning",
            ServiceState::Error => "error",
            ServiceState::Unknown => "unknown",
        }
    }

    /// 汇总多个服务状态：任一 error 即 error，其次 warning，全部 healthy 才是 healthy
    pub fn aggregate<'a>(states: impl IntoIterator<Item = &'a ServiceState>) -> ServiceState {
        let states: Vec<&ServiceState> = states.into_iter().collect();
        if states.is_empty() {
            ServiceState::Unknown
        } else if states.contains(&&ServiceState::Error) {
            ServiceState::Error
        } else if states.contains(&&ServiceState::Warning) {
            ServiceState::Warning
        } else if states.iter().all(|s| **s == ServiceState::Healthy) {
            ServiceState::Healthy
        } else {
            ServiceState::Unknown
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个服务的健康快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub service_name: String,
    pub status: ServiceState,
    #[serde(serialize_with = "serialize_secs")]
    pub response_time: Duration,
    pub last_check: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl HealthStatus {
    pub fn new(service_name: impl Into<String>, status: ServiceState, response_time: Duration) -> Self {
        Self {
            service_name: service_name.into(),
            status,
            response_time,
            last_check: Utc::now(),
            error_message: None,
            details: BTreeMap::new(),
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

#[derive(Default)]
struct Snapshot {
    checked_at: Option<Instant>,
    statuses: BTreeMap<String, HealthStatus>,
}

/// 聚合所有探测器的健康检查器，按间隔节流
pub struct HealthChecker {
    probes: Vec<Arc<dyn HealthProbe>>,
    interval: Duration,
    clock: Arc<dyn Clock>,
    snapshot: Mutex<Snapshot>,
    probe_lock: Mutex<()>,
}

impl HealthChecker {
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            probes: Vec::new(),
            interval,
            clock,
            snapshot: Mutex::new(Snapshot::default()),
            probe_lock: Mutex::new(()),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 间隔内直接返回上次结果，否则依次运行所有探测器
    pub fn run_full_health_check(&self) -> BTreeMap<String, HealthStatus> {
        if let Some(statuses) = self.fresh_snapshot() {
            return statuses;
        }

        let _probe = self.probe_lock.lock();
        if let Some(statuses) = self.fresh_snapshot() {
            return statuses;
        }

        info!(probes = self.probes.len(), "Running full health check");
        let statuses: BTreeMap<String, HealthStatus> = self
            .probes
            .iter()
            .map(|probe| (probe.service_key().to_string(), probe.probe()))
            .collect();

        for (service, status) in &statuses {
            let message = status.error_message.as_deref().unwrap_or("");
            match status.status {
                ServiceState::Error => error!(service = %service, error = %message, "Health check failed"),
                ServiceState::Warning => warn!(service = %service, warning = %message, "Health check warning"),
                _ => info!(
                    service = %service,
                    response_ms = status.response_time.as_millis() as u64,
                    "Health check passed"
                ),
            }
        }

        let mut snapshot = self.snapshot.lock();
        snapshot.checked_at = Some(self.clock.now());
        snapshot.statuses = statuses.clone();
        statuses
    }

    fn fresh_snapshot(&self) -> Option<BTreeMap<String, HealthStatus>> {
        let now = self.clock.now();
        let snapshot = self.snapshot.lock();
        snapshot
            .checked_at
            .filter(|at| now.saturating_duration_since(*at) < self.interval)
            .map(|_| snapshot.statuses.clone())
    }

    /// 最近一次结果，不触发探测
    pub fn latest(&self) -> BTreeMap<String, HealthStatus> {
        self.snapshot.lock().statuses.clone()
    }

    pub fn get_overall_status(&self) -> ServiceState {
        let snapshot = self.snapshot.lock();
        ServiceState::aggregate(snapshot.statuses.values().map(|s| &s.status))
    }

    /// 让下一次检查忽略节流
    pub fn invalidate(&self) {
        self.snapshot.lock().checked_at = None;
    }
}

/// 通过连接池会话探测图数据库
pub struct GraphDatabaseProbe {
    pool: Arc<ConnectionPool>,
}

impl GraphDatabaseProbe {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }
}

impl HealthProbe for GraphDatabaseProbe {
    fn service_key(&self) -> &str {
        "neo4j"
    }

    fn probe(&self) -> HealthStatus {
        let start = Instant::now();
        let mut details = BTreeMap::new();

        let outcome = self.pool.acquire_session().and_then(|mut session| {
            session.run(HEALTH_QUERY, &Parameters::new())?;

            // 版本信息拿不到不影响结果
            if let Ok(components) =
                session.run("CALL dbms.components() YIELD name, versions, edition", &Parameters::new())
                && let Some(record) = components.into_records().into_iter().next()
            {
                if let Some(version) = record.get("versions").and_then(|v| v.get(0)) {
                    details.insert("version".to_string(), version.clone());
                }
                if let Some(edition) = record.get("edition") {
                    details.insert("edition".to_string(), edition.clone());
                }
            }
            Ok(())
        });

        let elapsed = start.elapsed();
        let mut status = match outcome {
            Ok(()) => HealthStatus::new(GRAPH_SERVICE_NAME, ServiceState::Healthy, elapsed),
            Err(e) => HealthStatus::new(GRAPH_SERVICE_NAME, ServiceState::Error, elapsed)
                .with_error(e.to_string()),
        };
        status.details = details;
        status.details.insert("database".into(), json!(self.pool.database()));
        status
    }
}

/// 先本地校验密钥格式，再发一个最小的认证请求
pub struct AiApiProbe {
    client: Arc<dyn AnalysisClient>,
    api_key: String,
}

impl AiApiProbe {
    pub fn new(client: Arc<dyn AnalysisClient>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

impl HealthProbe for AiApiProbe {
    fn service_key(&self) -> &str {
        "claude"
    }

    fn probe(&self) -> HealthStatus {
        let start = Instant::now();

        if let Err(e) = validate_api_key(&self.api_key) {
            return HealthStatus::new(AI_SERVICE_NAME, ServiceState::Error, Duration::ZERO)
                .with_error(e.to_string());
        }

        match self.client.analyze(&AnalysisRequest::probe()) {
            Ok(_) => HealthStatus::new(AI_SERVICE_NAME, ServiceState::Healthy, start.elapsed())
                .with_detail("model", json!(self.client.model())),
            Err(e) => HealthStatus::new(AI_SERVICE_NAME, ServiceState::Error, start.elapsed())
                .with_error(e.to_string()),
        }
    }
}

type Sampler = Box<dyn Fn() -> ResourceUsage + Send + Sync>;

/// 本地配置与资源检查，不访问网络
pub struct EnvironmentProbe {
    config: CoreConfig,
    sampler: Sampler,
}

impl EnvironmentProbe {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            sampler: Box::new(ResourceUsage::sample),
        }
    }

    pub fn with_sampler(mut self, sampler: impl Fn() -> ResourceUsage + Send + Sync + 'static) -> Self {
        self.sampler = Box::new(sampler);
        self
    }
}

impl HealthProbe for EnvironmentProbe {
    fn service_key(&self) -> &str {
        "environment"
    }

    fn probe(&self) -> HealthStatus {
        let start = Instant::now();
        let usage = (self.sampler)();
        let missing = validator::missing_secrets(&self.config);
        let overloaded = usage.overloaded_resources();

        let mut warnings = Vec::new();
        if !missing.is_empty() {
            warnings.push(format!("missing secrets: {}", missing.join(", ")));
        }
        if !overloaded.is_empty() {
            warnings.push(format!("resource usage above 90%: {}", overloaded.join(", ")));
        }

        let state = if warnings.is_empty() {
            ServiceState::Healthy
        } else {
            ServiceState::Warning
        };

        let mut status = HealthStatus::new(ENVIRONMENT_SERVICE_NAME, state, start.elapsed())
            .with_detail("environment", json!(self.config.logging.environment))
            .with_detail("service_name", json!(self.config.logging.service_name))
            .with_detail("secrets_available", json!(missing.is_empty()))
            .with_detail("memory_percentage", json!(round1(usage.memory_percentage)))
            .with_detail("disk_percentage", json!(round1(usage.disk_percentage)))
            .with_detail("file_descriptors_used", json!(usage.file_descriptors_used));
        if let Some(limit) = usage.file_descriptors_limit {
            status = status.with_detail("file_descriptors_limit", json!(limit));
        }
        if !warnings.is_empty() {
            status = status.with_error(warnings.join("; "));
        }
        status
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProbe {
        key: &'static str,
        state: ServiceState,
        calls: AtomicUsize,
    }

    impl FixedProbe {
        fn new(key: &'static str, state: ServiceState) -> Arc<Self> {
            Arc::new(Self {
                key,
                state,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl HealthProbe for FixedProbe {
        fn service_key(&self) -> &str {
            self.key
        }

        fn probe(&self) -> HealthStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            HealthStatus::new(self.key, self.state, Duration::from_millis(1))
        }
    }

    #[test]
    fn test_aggregate_rules() {
        use ServiceState::*;
        assert_eq!(ServiceState::aggregate(&[]), Unknown);
        assert_eq!(ServiceState::aggregate(&[Healthy, Warning, Error]), Error);
        assert_eq!(ServiceState::aggregate(&[Healthy, Warning]), Warning);
        assert_eq!(ServiceState::aggregate(&[Healthy, Healthy]), Healthy);
        assert_eq!(ServiceState::aggregate(&[Healthy, Unknown]), Unknown);
    }

    #[test]
    fn test_full_check_is_throttled() {
        let clock = ManualClock::default();
        let probe = FixedProbe::new("neo4j", ServiceState::Healthy);
        let checker = HealthChecker::new(Duration::from_secs(300), Arc::new(clock.clone()))
            .with_probe(probe.clone());

        assert_eq!(checker.get_overall_status(), ServiceState::Unknown);

        let first = checker.run_full_health_check();
        clock.advance(Duration::from_secs(299));
        let second = checker.run_full_health_check();
        assert_eq!(first, second);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        checker.run_full_health_check();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);

        checker.invalidate();
        checker.run_full_health_check();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_overall_status_reflects_worst_service() {
        let checker = HealthChecker::new(Duration::from_secs(300), Arc::new(ManualClock::default()))
            .with_probe(FixedProbe::new("neo4j", ServiceState::Healthy))
            .with_probe(FixedProbe::new("environment", ServiceState::Warning));

        let statuses = checker.run_full_health_check();
        assert_eq!(statuses.len(), 2);
        assert_eq!(checker.get_overall_status(), ServiceState::Warning);
    }

    #[test]
    fn test_environment_probe_warns_on_overload() {
        let mut config = CoreConfig::default();
        config.database.password = "secret".into();
        config.ai.api_key = format!("sk-ant-api03-{}", "a".repeat(60));

        let healthy = EnvironmentProbe::new(config.clone()).with_sampler(ResourceUsage::default);
        assert_eq!(healthy.probe().status, ServiceState::Healthy);

        let loaded = EnvironmentProbe::new(config).with_sampler(|| ResourceUsage {
            disk_percentage: 97.0,
            ..ResourceUsage::default()
        });
        let status = loaded.probe();
        assert_eq!(status.status, ServiceState::Warning);
        assert!(status.error_message.unwrap().contains("disk"));
    }

    #[test]
    fn test_environment_probe_flags_missing_secrets() {
        let probe = EnvironmentProbe::new(CoreConfig::default()).with_sampler(ResourceUsage::default);
        assert_eq!(probe.service_key(), "environment");
        let status = probe.probe();
        assert_eq!(status.status, ServiceState::Warning);
        assert_eq!(status.details["secrets_available"], json!(false));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let status = HealthStatus::new("x", ServiceState::Healthy, Duration::from_millis(250));
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["status"], json!("healthy"));
        assert_eq!(value["response_time"], json!(0.25));
        assert!(value.get("error_message").is_none());
    }
}
