use super::traits::Clock;
use crate::config::RateLimitConfig;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 日限额的滚动窗口
pub const DAILY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// 单个调用方可占用全局请求速率的比例
pub const CALLER_SHARE: f64 = 0.1;

/// 令牌桶算法实现
///
/// 令牌数为小数，在每次 `consume`/`available_tokens` 时按经过的时间惰性补充，
/// 补充与扣减在同一把锁内完成。
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64, // tokens per second
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_rate: f64, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            capacity: capacity as f64,
            refill_rate: refill_rate.max(0.0),
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: now,
            }),
            clock,
        }
    }

    /// 按每分钟容量构建，一分钟内补满
    pub fn per_minute(capacity: u32, clock: Arc<dyn Clock>) -> Self {
        Self::new(capacity, capacity as f64 / 60.0, clock)
    }

    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    /// 尝试取出 n 个令牌，不足时不改变状态
    pub fn consume(&self, n: u32) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);

        let needed = n as f64;
        if state.tokens >= needed {
            state.tokens -= needed;
            true
        } else {
            false
        }
    }

    pub fn available_tokens(&self) -> u32 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens.floor() as u32
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}

/// 当前限额快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitsStatus {
    pub global_requests_available: u32,
    pub global_tokens_available: u32,
    pub daily_requests_used: usize,
    pub daily_requests_limit: u32,
    pub caller_requests_available: Option<u32>,
}

/// 拒绝原因，只用于日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    GlobalRequests,
    GlobalTokens,
    Daily,
    Caller,
}

/// 组合限流器：全局请求桶、全局 token 桶、24 小时滚动日限额和按调用方的桶
///
/// 各部分使用独立的锁，不相关的调用方不会争用同一把锁。
pub struct RateLimiter {
    config: RateLimitConfig,
    request_bucket: TokenBucket,
    token_bucket: TokenBucket,
    daily_requests: Mutex<VecDeque<Instant>>,
    caller_buckets: DashMap<String, Arc<TokenBucket>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            request_bucket: TokenBucket::per_minute(config.requests_per_minute, clock.clone()),
            token_bucket: TokenBucket::per_minute(config.tokens_per_minute, clock.clone()),
            daily_requests: Mutex::new(VecDeque::new()),
            caller_buckets: DashMap::new(),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// 单个调用方的每分钟容量，至少为 1
    pub fn caller_capacity(&self) -> u32 {
        ((self.config.requests_per_minute as f64 * CALLER_SHARE).floor() as u32).max(1)
    }

    /// 按固定顺序检查所有限额，任何一步失败立即返回 false，后续步骤不产生副作用
    pub fn check_rate_limit(&self, caller_id: Option<&str>, tokens_required: u32) -> bool {
        if let Err(kind) = self.admit(caller_id, tokens_required) {
            match kind {
                LimitKind::GlobalRequests => warn!("Global request rate limit exceeded"),
                LimitKind::GlobalTokens => {
                    warn!(tokens_required, "Global token rate limit exceeded")
                }
                LimitKind::Daily => warn!(
                    limit = self.config.requests_per_day,
                    "Daily request limit exceeded"
                ),
                LimitKind::Caller => {
                    let caller = caller_id.unwrap_or_default();
                    warn!(
                        target: "security",
                        event_type = "rate_limit_exceeded",
                        user_id = caller,
                        service = "ai_api",
                        limit = self.caller_capacity(),
                        "Rate limit exceeded for caller"
                    );
                }
            }
            return false;
        }
        true
    }

    fn admit(&self, caller_id: Option<&str>, tokens_required: u32) -> Result<(), LimitKind> {
        if !self.request_bucket.consume(1) {
            return Err(LimitKind::GlobalRequests);
        }

        if !self.token_bucket.consume(tokens_required) {
            return Err(LimitKind::GlobalTokens);
        }

        if !self.check_daily_limit() {
            return Err(LimitKind::Daily);
        }

        if let Some(caller) = caller_id
            && !self.caller_bucket(caller).consume(1)
        {
            return Err(LimitKind::Caller);
        }

        Ok(())
    }

    fn check_daily_limit(&self) -> bool {
        let mut requests = self.daily_requests.lock();
        let now = self.clock.now();

        // 移除窗口外的旧请求
        while let Some(oldest) = requests.front() {
            if now.saturating_duration_since(*oldest) >= DAILY_WINDOW {
                requests.pop_front();
            } else {
                break;
            }
        }

        if requests.len() >= self.config.requests_per_day as usize {
            return false;
        }

        requests.push_back(now);
        true
    }

    fn caller_bucket(&self, caller_id: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self.caller_buckets.get(caller_id) {
            return Arc::clone(bucket.value());
        }

        self.caller_buckets
            .entry(caller_id.to_string())
            .or_insert_with(|| {
                debug!(caller = caller_id, "创建调用方令牌桶");
                Arc::new(TokenBucket::per_minute(
                    self.caller_capacity(),
                    self.clock.clone(),
                ))
            })
            .value()
            .clone()
    }

    /// 只读快照（桶的惰性补充除外），不会为未知调用方创建桶
    pub fn get_limits_status(&self, caller_id: Option<&str>) -> LimitsStatus {
        let daily_used = {
            let requests = self.daily_requests.lock();
            let now = self.clock.now();
            requests
                .iter()
                .filter(|t| now.saturating_duration_since(**t) < DAILY_WINDOW)
                .count()
        };

        let caller_requests_available = caller_id.map(|caller| {
            match self.caller_buckets.get(caller) {
                Some(bucket) => bucket.available_tokens(),
                None => self.caller_capacity(),
            }
        });

        LimitsStatus {
            global_requests_available: self.request_bucket.available_tokens(),
            global_tokens_available: self.token_bucket.available_tokens(),
            daily_requests_used: daily_used,
            daily_requests_limit: self.config.requests_per_day,
            caller_requests_available,
        }
    }

    pub fn tracked_callers(&self) -> usize {
        self.caller_buckets.len()
    }
}
