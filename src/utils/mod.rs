pub mod format;

pub use format::{format_bytes, format_latency, truncate_string};
