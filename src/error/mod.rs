use std::io::Error as IoError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Graph database error: {0}")]
    Graph(#[from] GraphError),

    #[error("AI API error: {0}")]
    Api(#[from] ApiError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Timed out after {0:?} waiting for a database session")]
    AcquisitionTimeout(Duration),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadFailed(#[source] IoError),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// 图数据库错误，按 Neo4j 状态码分类
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Client error [{code}]: {message}")]
    Client { code: String, message: String },

    #[error("Transient error [{code}]: {message}")]
    Transient { code: String, message: String },

    #[error("Database error [{code}]: {message}")]
    Database { code: String, message: String },

    #[error("Unexpected response: {0}")]
    Protocol(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("API key not configured")]
    MissingKey,

    #[error("Invalid API key format: {0}")]
    InvalidKeyFormat(String),

    #[error("API authentication failed: {0}")]
    AuthFailed(String),

    #[error("API rate limited: {0}")]
    RateLimited(String),

    #[error("API unavailable: {0}")]
    Unavailable(String),

    #[error("API returned status {status}: {message}")]
    BadRequest { status: u16, message: String },

    #[error("API request timed out")]
    Timeout,

    #[error("Failed to connect to API: {0}")]
    Connection(String),

    #[error("Unexpected API response: {0}")]
    Protocol(String),
}

impl GraphError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GraphError::ServiceUnavailable(_) | GraphError::Transient { .. }
        )
    }
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited(_)
                | ApiError::Unavailable(_)
                | ApiError::Timeout
                | ApiError::Connection(_)
        )
    }
}

// 为错误类型实现一些便利方法
impl GridError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GridError::Graph(e) => e.is_retryable(),
            GridError::Api(e) => e.is_retryable(),
            GridError::AcquisitionTimeout(_) => true,
            _ => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        match self {
            GridError::Graph(GraphError::AuthFailed(_))
            | GridError::Graph(GraphError::Client { .. })
            | GridError::Api(ApiError::MissingKey)
            | GridError::Api(ApiError::InvalidKeyFormat(_))
            | GridError::Api(ApiError::AuthFailed(_))
            | GridError::Api(ApiError::BadRequest { .. })
            | GridError::Config(_)
            | GridError::Validation(_)
            | GridError::PoolClosed => true,
            _ => false,
        }
    }

    pub fn error_code(&self) -> u32 {
        match self {
            GridError::Config(_) => 1000,
            GridError::Graph(_) => 2000,
            GridError::Api(_) => 3000,
            GridError::Validation(_) => 10000,
            GridError::AcquisitionTimeout(_) => 11000,
            GridError::PoolClosed => 16000,
        }
    }
}

// Result 类型别名
pub type Result<T> = std::result::Result<T, GridError>;
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type GraphResult<T> = std::result::Result<T, GraphError>;
pub type ApiResult<T> = std::result::Result<T, ApiError>;
