//! Refresh analytics: JSONL logging of refresh stages and their summary.

pub mod logger;
pub mod reporter;
