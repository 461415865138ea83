//! ingestd library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (run, status, runs, config)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    build_sources, init_logging, list_runs, load_settings, render_config, run_ingestion,
    show_config, show_status, GlobalOptions, RunOptions,
};
