use grid_resilience::CoreServices;
use grid_resilience::core::middleware::timed;
use grid_resilience::error::GridError;
use grid_resilience::graph::Parameters;
use serde_json::Value;

pub fn cmd_query(
    services: &CoreServices,
    query: &str,
    params: &[String],
    cached: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let parameters = parse_params(params)?;

    services.pool.verify_connectivity()?;
    let records = timed("cli_query", services.recorder.as_ref(), || {
        if cached {
            services.cached_query(query, &parameters, None)
        } else {
            services.query_with_retry(query, &parameters)
        }
    })?;

    println!("{}", serde_json::to_string_pretty(&records)?);
    eprintln!("✅ 返回 {} 行", records.len());
    Ok(())
}

/// `key=value`，value 能按 JSON 解析就按 JSON，否则当字符串
pub fn parse_params(params: &[String]) -> Result<Parameters, GridError> {
    let mut parsed = Parameters::new();
    for param in params {
        let (key, raw) = param
            .split_once('=')
            .ok_or_else(|| GridError::Validation(format!("parameter '{}' must be key=value", param)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(GridError::Validation(format!("parameter '{}' has an empty key", param)));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        parsed.insert(key.to_string(), value);
    }
    Ok(parsed)
}
