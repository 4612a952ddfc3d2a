use super::{AnalysisClient, AnalysisRequest, AnalysisResponse, key_fingerprint};
use crate::config::AiConfig;
use crate::core::perf::TracingPerformanceLogger;
use crate::core::traits::PerformanceRecorder;
use crate::error::{ApiError, ApiResult};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

const MESSAGES_PATH: &str = "/v1/messages";
const SERVICE: &str = "claude";

/// Messages API 的阻塞客户端
pub struct HttpAnalysisClient {
    client: Client,
    endpoint: String,
    api_key: String,
    api_version: String,
    model: String,
    recorder: Arc<dyn PerformanceRecorder>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl HttpAnalysisClient {
    pub fn new(config: &AiConfig) -> ApiResult<Self> {
        Self::with_recorder(config, Arc::new(TracingPerformanceLogger::new()))
    }

    pub fn with_recorder(config: &AiConfig, recorder: Arc<dyn PerformanceRecorder>) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ApiError::Connection(e.to_string()))?;

        info!(model = %config.model, base_url = %config.base_url, "Initialized analysis client");

        Ok(Self {
            client,
            endpoint: format!("{}{}", config.base_url.trim_end_matches('/'), MESSAGES_PATH),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
            model: config.model.clone(),
            recorder,
        })
    }

    fn send(&self, request: &AnalysisRequest) -> ApiResult<(StatusCode, String)> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .json(&body)
            .send()
            .map_err(classify_transport_error)?;

        let status = response.status();
        let text = response.text().map_err(classify_transport_error)?;
        Ok((status, text))
    }
}

impl AnalysisClient for HttpAnalysisClient {
    #[instrument(skip(self, request), fields(model = %self.model, max_tokens = request.max_tokens))]
    fn analyze(&self, request: &AnalysisRequest) -> ApiResult<AnalysisResponse> {
        if self.api_key.is_empty() {
            return Err(ApiError::MissingKey);
        }

        let start = Instant::now();
        let outcome = self.send(request);
        let elapsed = start.elapsed();

        let (status, text) = match outcome {
            Ok(pair) => pair,
            Err(e) => {
                self.recorder
                    .record_api_call(SERVICE, MESSAGES_PATH, elapsed, false, None);
                return Err(e);
            }
        };

        let success = status.is_success();
        self.recorder
            .record_api_call(SERVICE, MESSAGES_PATH, elapsed, success, Some(status.as_u16()));
        log_key_usage(&self.api_key, success);

        if !success {
            return Err(classify_status(status, &text));
        }

        let parsed: MessagesResponse = serde_json::from_str(&text)
            .map_err(|e| ApiError::Protocol(format!("invalid response body: {}", e)))?;
        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        debug!(
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "Analysis completed"
        );

        Ok(AnalysisResponse {
            text,
            model: if parsed.model.is_empty() {
                self.model.clone()
            } else {
                parsed.model
            },
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
            stop_reason: parsed.stop_reason,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn log_key_usage(api_key: &str, success: bool) {
    let api_key_hash = key_fingerprint(api_key);
    if success {
        info!(target: "security", event_type = "api_key_usage", api_key_hash = %api_key_hash, service = SERVICE, success, "API key usage for {}", SERVICE);
    } else {
        warn!(target: "security", event_type = "api_key_usage", api_key_hash = %api_key_hash, service = SERVICE, success, "API key usage for {}", SERVICE);
    }
}

fn classify_transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Connection(e.to_string())
    }
}

/// 按 HTTP 状态分类失败
pub fn classify_status(status: StatusCode, body: &str) -> ApiError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status.as_u16() {
        401 | 403 => ApiError::AuthFailed(message),
        429 => ApiError::RateLimited(message),
        408 => ApiError::Timeout,
        500..=599 => ApiError::Unavailable(format!("API returned status {}: {}", status.as_u16(), message)),
        code => ApiError::BadRequest {
            status: code,
            message,
        },
    }
}
