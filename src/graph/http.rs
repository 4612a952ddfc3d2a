use super::{GraphDriver, GraphSession, Parameters, QueryResult};
use crate::config::{DatabaseConfig, PoolConfig};
use crate::error::{GraphError, GraphResult};
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument};

const HTTP_PORT: u16 = 7474;
const HTTPS_PORT: u16 = 7473;

/// Neo4j HTTP 事务接口驱动
///
/// 每条语句通过 `POST /db/{database}/tx/commit` 单独提交。
pub struct HttpGraphDriver {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpGraphDriver {
    #[instrument(skip(database, pool), fields(uri = %database.uri))]
    pub fn new(database: &DatabaseConfig, pool: &PoolConfig) -> GraphResult<Self> {
        let base_url = http_base_url(&database.uri)?;

        let client = Client::builder()
            .connect_timeout(pool.connection_timeout())
            .timeout(pool.acquisition_timeout())
            .pool_max_idle_per_host(pool.max_pool_size)
            .pool_idle_timeout(pool.max_connection_lifetime())
            .build()
            .map_err(|e| {
                error!(error = %e, "创建 HTTP 客户端失败");
                GraphError::ServiceUnavailable(e.to_string())
            })?;

        info!(base_url = %base_url, "图数据库驱动初始化成功");

        Ok(Self {
            client,
            base_url,
            username: database.username.clone(),
            password: database.password.clone(),
        })
    }
}

impl GraphDriver for HttpGraphDriver {
    fn session(&self, database: &str) -> GraphResult<Box<dyn GraphSession>> {
        let endpoint = format!(
            "{}/db/{}/tx/commit",
            self.base_url,
            urlencoding::encode(database)
        );
        Ok(Box::new(HttpGraphSession {
            client: self.client.clone(),
            endpoint,
            username: self.username.clone(),
            password: self.password.clone(),
        }))
    }

    fn endpoint(&self) -> String {
        self.base_url.clone()
    }
}

struct HttpGraphSession {
    client: Client,
    endpoint: String,
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<ServerError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<RowData>,
}

#[derive(Debug, Deserialize)]
struct RowData {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    code: String,
    #[serde(default)]
    message: String,
}

impl GraphSession for HttpGraphSession {
    fn run(&mut self, query: &str, parameters: &Parameters) -> GraphResult<QueryResult> {
        let body = json!({
            "statements": [{
                "statement": query,
                "parameters": parameters,
            }]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .map_err(|e| GraphError::ServiceUnavailable(e.to_string()))?;

        let status = response.status();
        debug!(status = status.as_u16(), endpoint = %self.endpoint, "收到图数据库响应");

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GraphError::AuthFailed(format!(
                "database rejected credentials ({})",
                status
            )));
        }
        if status.is_server_error() {
            return Err(GraphError::ServiceUnavailable(format!(
                "database returned {}",
                status
            )));
        }

        let text = response
            .text()
            .map_err(|e| GraphError::ServiceUnavailable(e.to_string()))?;
        let parsed: CommitResponse = serde_json::from_str(&text)
            .map_err(|e| GraphError::Protocol(format!("invalid response body: {}", e)))?;

        if let Some(err) = parsed.errors.into_iter().next() {
            return Err(classify_error(err.code, err.message));
        }
        if !status.is_success() {
            return Err(GraphError::Protocol(format!("unexpected status {}", status)));
        }

        let result = parsed.results.into_iter().next().unwrap_or(StatementResult {
            columns: Vec::new(),
            data: Vec::new(),
        });

        Ok(QueryResult::new(
            result.columns,
            result.data.into_iter().map(|d| d.row).collect(),
        ))
    }
}

/// 按 Neo4j 状态码前缀分类
pub fn classify_error(code: String, message: String) -> GraphError {
    if code.starts_with("Neo.ClientError.Security.") {
        GraphError::AuthFailed(message)
    } else if code.starts_with("Neo.TransientError.") {
        GraphError::Transient { code, message }
    } else if code.starts_with("Neo.ClientError.") {
        GraphError::Client { code, message }
    } else if code.starts_with("Neo.DatabaseError.") {
        GraphError::Database { code, message }
    } else {
        GraphError::Protocol(format!("{}: {}", code, message))
    }
}

/// 把 bolt/neo4j 连接串映射到对应的 HTTP 端点
pub fn http_base_url(uri: &str) -> GraphResult<String> {
    let parsed = Url::parse(uri)
        .map_err(|e| GraphError::Protocol(format!("invalid database uri '{}': {}", uri, e)))?;

    let scheme = parsed.scheme();
    if scheme == "http" || scheme == "https" {
        return Ok(uri.trim_end_matches('/').to_string());
    }

    let secure = match scheme {
        "bolt" | "neo4j" => false,
        "bolt+s" | "bolt+ssc" | "neo4j+s" | "neo4j+ssc" => true,
        other => {
            return Err(GraphError::Protocol(format!(
                "unsupported uri scheme '{}'",
                other
            )));
        }
    };

    let host = parsed
        .host_str()
        .ok_or_else(|| GraphError::Protocol(format!("database uri '{}' has no host", uri)))?;

    Ok(if secure {
        format!("https://{}:{}", host, HTTPS_PORT)
    } else {
        format!("http://{}:{}", host, HTTP_PORT)
    })
}
