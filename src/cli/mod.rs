use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "grid-resilience")]
#[command(about = "Resilience and throttling toolkit for the energy grid dashboard")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// YAML config file; environment variables are used when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe the graph database, AI API and runtime environment
    Health {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a Cypher query through the connection pool with retries
    Query {
        /// Query text, forwarded verbatim
        query: String,

        /// Query parameter as key=value (value parsed as JSON when possible)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Serve repeated queries from the cache
        #[arg(long)]
        cached: bool,
    },

    /// Send a prompt through the rate-limited AI client
    Analyze {
        prompt: String,

        #[arg(long)]
        caller: Option<String>,

        #[arg(long, default_value_t = 1000)]
        max_tokens: u32,
    },

    /// Show the effective configuration with secrets redacted
    Config,
}
