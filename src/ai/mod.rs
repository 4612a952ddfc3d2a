//! 文本分析 API 客户端
//!
//! 请求与响应内容对本 crate 来说是不透明的，这里只负责传输、认证与失败分类。

pub mod guarded;
pub mod http;

use crate::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use guarded::GuardedAnalysisClient;
pub use http::HttpAnalysisClient;

pub const API_KEY_PREFIX: &str = "sk-ant-api03-";
pub const MIN_API_KEY_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRequest {
    pub prompt: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl AnalysisRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: 4000,
            temperature: Some(0.3),
            system: None,
        }
    }

    /// 健康检查用的最小请求
    pub fn probe() -> Self {
        Self {
            prompt: "Hello".to_string(),
            max_tokens: 10,
            temperature: None,
            system: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// 输入部分的 token 估算，用于令牌配额
    pub fn estimated_tokens(&self) -> u32 {
        estimate_tokens(&self.prompt)
            + self.system.as_deref().map(estimate_tokens).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub text: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub stop_reason: Option<String>,
}

/// 文本分析服务
pub trait AnalysisClient: Send + Sync {
    fn analyze(&self, request: &AnalysisRequest) -> ApiResult<AnalysisResponse>;
    fn model(&self) -> &str;
}

/// 本地校验密钥格式：固定前缀、至少 64 个字符、只含字母数字和 `-`/`_`
pub fn validate_api_key(api_key: &str) -> ApiResult<()> {
    if api_key.is_empty() {
        return Err(ApiError::MissingKey);
    }
    if !api_key.starts_with(API_KEY_PREFIX) {
        return Err(ApiError::InvalidKeyFormat(format!(
            "key must start with '{}'",
            API_KEY_PREFIX
        )));
    }
    if api_key.len() < MIN_API_KEY_LEN {
        return Err(ApiError::InvalidKeyFormat(format!(
            "key must be at least {} characters",
            MIN_API_KEY_LEN
        )));
    }
    let body = &api_key[API_KEY_PREFIX.len()..];
    if body.is_empty()
        || !body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::InvalidKeyFormat(
            "key contains invalid characters".into(),
        ));
    }
    Ok(())
}

/// 粗略估算：约 4 个字符一个 token，至少 1
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4).max(1)
}

/// 密钥指纹，日志里只出现它
pub fn key_fingerprint(api_key: &str) -> String {
    let digest = Sha256::digest(api_key.as_bytes());
    hex::encode(&digest[..8])
}
