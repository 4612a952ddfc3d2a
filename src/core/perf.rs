use super::traits::PerformanceRecorder;
use std::time::Duration;
use tracing::info;

pub const PERFORMANCE_TARGET: &str = "performance";

/// 把性能指标写成 `performance` 目标下的结构化日志
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPerformanceLogger;

impl TracingPerformanceLogger {
    pub fn new() -> Self {
        Self
    }
}

impl PerformanceRecorder for TracingPerformanceLogger {
    fn record_query(&self, query: &str, elapsed: Duration, success: bool, rows: Option<usize>) {
        info!(
            target: PERFORMANCE_TARGET,
            metric_type = "database_query",
            query_type = query_type(query),
            execution_time = elapsed.as_secs_f64(),
            success,
            rows_returned = rows,
            "Database query executed"
        );
    }

    fn record_api_call(
        &self,
        service: &str,
        endpoint: &str,
        elapsed: Duration,
        success: bool,
        status_code: Option<u16>,
    ) {
        info!(
            target: PERFORMANCE_TARGET,
            metric_type = "api_call",
            service,
            endpoint,
            execution_time = elapsed.as_secs_f64(),
            success,
            status_code,
            "API call to {}: {}",
            service,
            endpoint
        );
    }

    fn record_function(&self, name: &str, elapsed: Duration, success: bool, error: Option<&str>) {
        info!(
            target: PERFORMANCE_TARGET,
            metric_type = "function_performance",
            function_name = name,
            execution_time = elapsed.as_secs_f64(),
            success,
            error,
            "Function performance: {}",
            name
        );
    }
}

/// 按语句首个关键字粗分类
pub fn query_type(query: &str) -> &'static str {
    let upper = query.trim_start().to_ascii_uppercase();
    if upper.starts_with("MATCH") {
        "read"
    } else if upper.starts_with("CREATE") {
        "create"
    } else if upper.starts_with("MERGE") {
        "merge"
    } else if upper.starts_with("DELETE") {
        "delete"
    } else if upper.starts_with("SET") {
        "update"
    } else {
        "other"
    }
}
