//! TTL + 容量上限的内存缓存。
//!
//! 淘汰策略是按创建时间先进先出（FIFO），读取不会刷新条目的位置。

use super::traits::Clock;
use crate::config::CacheConfig;
use crate::graph::Record;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// 缓存值的大小估算，只用于统计展示
pub trait EstimateSize {
    fn estimated_size(&self) -> usize;
}

impl EstimateSize for Value {
    fn estimated_size(&self) -> usize {
        self.to_string().len()
    }
}

impl EstimateSize for String {
    fn estimated_size(&self) -> usize {
        self.len()
    }
}

// 表格数据按实际占用估算
impl EstimateSize for Vec<Record> {
    fn estimated_size(&self) -> usize {
        let rows: usize = self
            .iter()
            .map(|record| {
                std::mem::size_of::<Record>()
                    + record
                        .iter()
                        .map(|(column, value)| {
                            column.capacity()
                                + std::mem::size_of::<Value>()
                                + value_heap_size(value)
                        })
                        .sum::<usize>()
            })
            .sum();
        std::mem::size_of::<Self>() + rows
    }
}

fn value_heap_size(value: &Value) -> usize {
    match value {
        Value::String(s) => s.capacity(),
        Value::Array(items) => items
            .iter()
            .map(|v| std::mem::size_of::<Value>() + value_heap_size(v))
            .sum(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| k.capacity() + std::mem::size_of::<Value>() + value_heap_size(v))
            .sum(),
        _ => 0,
    }
}

/// 由操作名和参数生成确定性的缓存键，关键字参数与顺序无关
pub fn cache_key(operation: &str, args: &[Value], kwargs: &BTreeMap<String, Value>) -> String {
    let key_data = json!({
        "func": operation,
        "args": args,
        "kwargs": kwargs,
    });
    let digest = Sha256::digest(key_data.to_string().as_bytes());
    hex::encode(digest)
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
    size_estimate: usize,
    seq: u64,
}

impl<V> CacheEntry<V> {
    /// 存活时间严格超过 ttl 才算过期，恰好等于 ttl 时仍可命中
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

#[derive(Debug, Clone, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    // evictions 中因过期被移除的部分
    expirations: u64,
    total_requests: u64,
}

struct CacheTable<V> {
    entries: HashMap<String, CacheEntry<V>>,
    // (created_at, seq) -> key，按创建顺序淘汰
    order: BTreeMap<(Instant, u64), String>,
    next_seq: u64,
    counters: Counters,
}

impl<V> CacheTable<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&(entry.created_at, entry.seq));
        Some(entry)
    }

    fn sweep_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            self.remove(&key);
            self.counters.evictions += 1;
            self.counters.expirations += 1;
        }
    }
}

/// 缓存统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub total_requests: u64,
    pub hit_rate: f64,
    pub current_size: usize,
    pub max_size: usize,
    pub estimated_bytes: usize,
}

pub struct CacheManager<V = Value> {
    default_ttl: Duration,
    max_cache_size: usize,
    table: Mutex<CacheTable<V>>,
    clock: Arc<dyn Clock>,
}

impl<V> CacheManager<V>
where
    V: Clone + EstimateSize,
{
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(config.default_ttl(), config.max_cache_size, clock)
    }

    pub fn with_limits(default_ttl: Duration, max_cache_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            default_ttl,
            max_cache_size,
            table: Mutex::new(CacheTable {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
                counters: Counters::default(),
            }),
            clock,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// 先清理所有过期条目，再查找
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut table = self.table.lock();
        table.counters.total_requests += 1;
        table.sweep_expired(now);

        match table.entries.get(key).map(|entry| entry.value.clone()) {
            Some(value) => {
                table.counters.hits += 1;
                Some(value)
            }
            None => {
                table.counters.misses += 1;
                None
            }
        }
    }

    /// 写入（或覆盖）条目，然后按创建时间淘汰最旧的条目直到满足容量上限
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let now = self.clock.now();
        let size_estimate = value.estimated_size();

        let mut table = self.table.lock();
        table.remove(&key);

        let seq = table.next_seq;
        table.next_seq += 1;
        table.order.insert((now, seq), key.clone());
        table.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                ttl: ttl.unwrap_or(self.default_ttl),
                size_estimate,
                seq,
            },
        );

        while table.entries.len() > self.max_cache_size {
            let Some((_, oldest)) = table.order.pop_first() else {
                break;
            };
            table.entries.remove(&oldest);
            table.counters.evictions += 1;
            debug!(key = %oldest, "缓存已满，淘汰最早的条目");
        }
    }

    /// 命中则返回缓存值，否则计算并写入；计算期间不持有锁
    pub fn get_or_compute<E, F>(&self, key: &str, ttl: Option<Duration>, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = compute()?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.table.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut table = self.table.lock();
        table.entries.clear();
        table.order.clear();
        info!("Cache cleared");
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_stats(&self) -> CacheStats {
        let table = self.table.lock();
        let counters = &table.counters;
        let hit_rate = if counters.total_requests > 0 {
            counters.hits as f64 / counters.total_requests as f64
        } else {
            0.0
        };

        CacheStats {
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            expirations: counters.expirations,
            total_requests: counters.total_requests,
            hit_rate,
            current_size: table.entries.len(),
            max_size: self.max_cache_size,
            estimated_bytes: table.entries.values().map(|e| e.size_estimate).sum(),
        }
    }
}
