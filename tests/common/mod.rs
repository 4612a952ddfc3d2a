#![allow(dead_code)]

use grid_resilience::config::CoreConfig;
use grid_resilience::error::{GraphError, GraphResult};
use grid_resilience::graph::{GraphDriver, GraphSession, Parameters, QueryResult};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use warp::Filter;
use warp::http::StatusCode;

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn valid_api_key() -> String {
    format!("sk-ant-api03-{}", "A1b2C3d4_".repeat(8))
}

/// 指向本地 mock 服务的配置，重试延迟压到毫秒级
pub fn test_config(graph: SocketAddr, ai: SocketAddr) -> CoreConfig {
    let mut config = CoreConfig::default();
    config.database.uri = format!("http://{}", graph);
    config.database.password = "grid-password".into();
    config.ai.base_url = format!("http://{}", ai);
    config.ai.api_key = valid_api_key();
    config.ai.timeout_secs = 5;
    config.pool.connection_timeout_secs = 2;
    config.pool.acquisition_timeout_secs = 2;
    config.retry.max_retries = 2;
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 50;
    config
}

// ---------------------------------------------------------------------------
// 统计 WARN 事件的 tracing 层
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct WarnCounter {
    count: Arc<AtomicUsize>,
    target_prefix: &'static str,
}

impl WarnCounter {
    pub fn for_target(target_prefix: &'static str) -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
            target_prefix,
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() == Level::WARN && metadata.target().starts_with(self.target_prefix) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ---------------------------------------------------------------------------
// 脚本化的内存图数据库驱动
// ---------------------------------------------------------------------------

/// 按脚本依次返回失败，脚本用完后返回固定结果
#[derive(Clone)]
pub struct FlakyDriver {
    script: Arc<Mutex<VecDeque<GraphError>>>,
    result: QueryResult,
    runs: Arc<AtomicUsize>,
}

impl FlakyDriver {
    pub fn new(failures: Vec<GraphError>, result: QueryResult) -> Self {
        Self {
            script: Arc::new(Mutex::new(failures.into())),
            result,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

struct FlakySession {
    driver: FlakyDriver,
}

impl GraphDriver for FlakyDriver {
    fn session(&self, _database: &str) -> GraphResult<Box<dyn GraphSession>> {
        Ok(Box::new(FlakySession {
            driver: self.clone(),
        }))
    }

    fn endpoint(&self) -> String {
        "memory://flaky".into()
    }
}

impl GraphSession for FlakySession {
    fn run(&mut self, _query: &str, _parameters: &Parameters) -> GraphResult<QueryResult> {
        self.driver.runs.fetch_add(1, Ordering::SeqCst);
        match self.driver.script.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(self.driver.result.clone()),
        }
    }
}

pub fn equipment_rows() -> QueryResult {
    QueryResult::new(
        vec!["equipment_id".into(), "risk_score".into()],
        vec![
            vec![json!("TX-001"), json!(0.82)],
            vec![json!("TX-002"), json!(0.41)],
        ],
    )
}

// ---------------------------------------------------------------------------
// warp mock 服务，运行在独立线程的 tokio runtime 上
// ---------------------------------------------------------------------------

fn free_addr() -> SocketAddr {
    // 这里绑定到端口0的作用是让系统分配
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn wait_until_listening(addr: SocketAddr) {
    for _ in 0..100 {
        if TcpStream::connect_timeout(&addr, Duration::from_millis(50)).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("mock server on {} did not start", addr);
}

/// mock 图数据库的可变状态
#[derive(Default)]
pub struct GraphServerState {
    pub reject_auth: bool,
    /// 依次消耗的失败状态码
    pub failures: VecDeque<(u16, Value)>,
    pub rows: Vec<Vec<Value>>,
    pub columns: Vec<String>,
    pub requests: usize,
    pub statements: Vec<String>,
}

pub type SharedGraphState = Arc<Mutex<GraphServerState>>;

fn graph_reply(state: &SharedGraphState, database: &str, auth: Option<String>, body: Value) -> (StatusCode, Value) {
    let mut state = state.lock();
    state.requests += 1;

    let statement = body["statements"][0]["statement"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    state.statements.push(format!("{}:{}", database, statement));

    let authorized = auth.map(|a| a.starts_with("Basic ")).unwrap_or(false);
    if state.reject_auth || !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            json!({"results": [], "errors": [{
                "code": "Neo.ClientError.Security.Unauthorized",
                "message": "The client is unauthorized due to authentication failure."
            }]}),
        );
    }

    if let Some((status, payload)) = state.failures.pop_front() {
        return (StatusCode::from_u16(status).unwrap(), payload);
    }

    if statement.contains("dbms.components") {
        return (
            StatusCode::OK,
            json!({"results": [{
                "columns": ["name", "versions", "edition"],
                "data": [{"row": ["Neo4j Kernel", ["5.15.0"], "community"], "meta": [null, null, null]}]
            }], "errors": []}),
        );
    }
    if statement.starts_with("RETURN 1") {
        return (
            StatusCode::OK,
            json!({"results": [{"columns": ["health_check"], "data": [{"row": [1]}]}], "errors": []}),
        );
    }
    if statement.contains("SYNTAX ERROR") {
        return (
            StatusCode::OK,
            json!({"results": [], "errors": [{
                "code": "Neo.ClientError.Statement.SyntaxError",
                "message": "Invalid input 'SYNTAX'"
            }]}),
        );
    }

    let data: Vec<Value> = state.rows.iter().map(|row| json!({"row": row})).collect();
    (
        StatusCode::OK,
        json!({"results": [{"columns": state.columns, "data": data}], "errors": []}),
    )
}

pub fn start_mock_graph_server(state: SharedGraphState) -> SocketAddr {
    let addr = free_addr();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let route = warp::post()
                .and(warp::path!("db" / String / "tx" / "commit"))
                .and(warp::header::optional::<String>("authorization"))
                .and(warp::body::json())
                .map(move |database: String, auth: Option<String>, body: Value| {
                    let (status, payload) = graph_reply(&state, &database, auth, body);
                    warp::reply::with_status(warp::reply::json(&payload), status)
                });
            warp::serve(route).run(addr).await;
        });
    });

    wait_until_listening(addr);
    addr
}

/// mock 分析 API 的可变状态
pub struct AiServerState {
    pub api_key: String,
    pub failures: VecDeque<u16>,
    pub requests: usize,
    pub last_body: Option<Value>,
}

impl AiServerState {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            failures: VecDeque::new(),
            requests: 0,
            last_body: None,
        }
    }
}

pub type SharedAiState = Arc<Mutex<AiServerState>>;

fn ai_reply(state: &SharedAiState, api_key: Option<String>, version: Option<String>, body: Value) -> (StatusCode, Value) {
    let mut state = state.lock();
    state.requests += 1;
    state.last_body = Some(body.clone());

    if api_key.as_deref() != Some(state.api_key.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            json!({"type": "error", "error": {"type": "authentication_error", "message": "invalid x-api-key"}}),
        );
    }
    if version.as_deref() != Some("2023-06-01") {
        return (
            StatusCode::BAD_REQUEST,
            json!({"type": "error", "error": {"type": "invalid_request_error", "message": "missing anthropic-version"}}),
        );
    }
    if let Some(status) = state.failures.pop_front() {
        return (
            StatusCode::from_u16(status).unwrap(),
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        );
    }

    (
        StatusCode::OK,
        json!({
            "id": "msg_test",
            "type": "message",
            "role": "assistant",
            "model": body["model"],
            "content": [{"type": "text", "text": "Transformer TX-001 needs inspection."}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 7}
        }),
    )
}

pub fn start_mock_ai_server(state: SharedAiState) -> SocketAddr {
    let addr = free_addr();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let route = warp::post()
                .and(warp::path!("v1" / "messages"))
                .and(warp::header::optional::<String>("x-api-key"))
                .and(warp::header::optional::<String>("anthropic-version"))
                .and(warp::body::json())
                .map(move |key: Option<String>, version: Option<String>, body: Value| {
                    let (status, payload) = ai_reply(&state, key, version, body);
                    warp::reply::with_status(warp::reply::json(&payload), status)
                });
            warp::serve(route).run(addr).await;
        });
    });

    wait_until_listening(addr);
    addr
}
