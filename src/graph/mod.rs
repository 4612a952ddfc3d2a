//! 图数据库客户端抽象
//!
//! 连接池只依赖这里的 trait，具体驱动可以是 HTTP 事务接口，也可以是测试中的内存实现。

pub mod http;

use crate::error::GraphResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub use http::HttpGraphDriver;

/// 查询结果中的一行，列名到值
pub type Record = BTreeMap<String, Value>;

/// 查询参数，原样转发给数据库
pub type Parameters = BTreeMap<String, Value>;

/// 一次语句执行的原始结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 按列名把每一行转换成 Record，缺失的列填 null
    pub fn into_records(self) -> Vec<Record> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|row| {
                let mut values = row.into_iter();
                columns
                    .iter()
                    .map(|column| (column.clone(), values.next().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect()
    }
}

/// 图数据库驱动
pub trait GraphDriver: Send + Sync {
    /// 打开一个会话，会话用完即丢弃
    fn session(&self, database: &str) -> GraphResult<Box<dyn GraphSession>>;

    /// 用于日志的端点描述，不包含凭证
    fn endpoint(&self) -> String;

    fn close(&self) {}
}

pub trait GraphSession: Send {
    fn run(&mut self, query: &str, parameters: &Parameters) -> GraphResult<QueryResult>;
}
