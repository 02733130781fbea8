//! Command handlers: bridge CLI args to the core controller and output formatting.

pub mod config_cmd;
pub mod simulate;
