pub mod cache;
pub mod clock;
pub mod health;
pub mod middleware;
pub mod perf;
pub mod pool;
pub mod rate_limit;
pub mod resources;
pub mod retry;
pub mod traits;
