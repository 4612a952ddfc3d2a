pub mod analyze;
pub mod config;
pub mod health;
pub mod query;

use grid_resilience::config::CoreConfig;
use grid_resilience::error::Result;
use std::path::Path;

/// 指定了文件就读文件，否则读环境变量
pub fn load_config(path: Option<&Path>) -> Result<CoreConfig> {
    let config = match path {
        Some(path) => CoreConfig::from_file(path)?,
        None => CoreConfig::from_env()?,
    };
    Ok(config)
}
