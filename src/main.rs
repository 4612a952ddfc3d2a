mod cli;
mod commands;

use crate::cli::{Cli, Commands};
use clap::Parser;
use grid_resilience::CoreServices;
use grid_resilience::config::LogLevel;
use grid_resilience::logging::init_logging;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = commands::load_config(cli.config.as_deref())?;
    if cli.verbose {
        config.logging.level = LogLevel::Debug;
    }

    // 初始化日志
    let root_span = init_logging(&config.logging)?;
    let _entered = root_span.enter();

    if let Commands::Config = cli.command {
        return commands::config::cmd_show_config(&config);
    }

    let services = CoreServices::from_config(config)?;
    let result = match cli.command {
        Commands::Health { json } => commands::health::cmd_health(&services, json),
        Commands::Query {
            query,
            params,
            cached,
        } => commands::query::cmd_query(&services, &query, &params, cached),
        Commands::Analyze {
            prompt,
            caller,
            max_tokens,
        } => commands::analyze::cmd_analyze(&services, &prompt, caller.as_deref(), max_tokens),
        Commands::Config => Ok(()),
    };

    services.shutdown();
    result
}
