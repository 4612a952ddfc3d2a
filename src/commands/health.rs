use grid_resilience::core::health::HealthStatus;
use grid_resilience::utils::{format_bytes, format_latency, truncate_string};
use grid_resilience::{CoreServices, ServiceState};
use prettytable::{Table, row};
use std::collections::BTreeMap;

pub fn cmd_health(services: &CoreServices, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let statuses = services.health.run_full_health_check();
    let overall = services.health.get_overall_status();

    if json {
        let report = serde_json::json!({
            "overall": overall,
            "services": statuses,
            "rate_limits": services.rate_limiter.get_limits_status(None),
            "cache": services.query_cache.get_stats(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{} 系统状态: {}", icon(overall), overall);
    print_table(&statuses);

    let limits = services.rate_limiter.get_limits_status(None);
    println!(
        "\n🚦 限流: 请求 {} 可用, 令牌 {} 可用, 今日 {}/{}",
        limits.global_requests_available,
        limits.global_tokens_available,
        limits.daily_requests_used,
        limits.daily_requests_limit
    );

    let cache = services.query_cache.get_stats();
    println!(
        "🗄️  缓存: {}/{} 条, 命中率 {:.1}%, 约 {}",
        cache.current_size,
        cache.max_size,
        cache.hit_rate * 100.0,
        format_bytes(cache.estimated_bytes as u64)
    );
    Ok(())
}

fn print_table(statuses: &BTreeMap<String, HealthStatus>) {
    let mut table = Table::new();
    table.add_row(row!["服务", "状态", "响应时间", "详情"]);

    for status in statuses.values() {
        let detail = match &status.error_message {
            Some(message) => message.clone(),
            None => status
                .details
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", "),
        };
        table.add_row(row![
            &status.service_name,
            format!("{} {}", icon(status.status), status.status),
            format_latency(status.response_time),
            truncate_string(&detail, 60)
        ]);
    }

    table.printstd();
}

fn icon(state: ServiceState) -> &'static str {
    match state {
        ServiceState::Healthy => "🟢",
        ServiceState::Warning => "🟡",
        ServiceState::Error => "🔴",
        ServiceState::Unknown => "⚪",
    }
}
