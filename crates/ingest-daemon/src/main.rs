//! ingestd
//!
//! Incremental, multi-tenant document ingestion into vector indexes.
//!
//! # Usage
//!
//! ```bash
//! ingestd run [--tenant ID]... [--deadline-secs N] [--keep-removed] [--json]
//! ingestd status [--tenant ID]
//! ingestd runs [-n LIMIT] [--json]
//! ingestd config
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/ingest-engine/config.toml)
//! 3. Environment variables (INGEST_*)
//! 4. CLI flags
//!
//! The process exits non-zero only on fatal errors; documents that fail
//! during a run are listed in the printed summary.

use anyhow::Result;
use clap::Parser;

use ingest_daemon::{
    list_runs, run_ingestion, show_config, show_status, Cli, Commands, GlobalOptions, RunOptions,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let global = GlobalOptions {
        config_path: cli.config,
        log_level: cli.log_level,
        db_path: cli.db_path,
    };

    match cli.command {
        Commands::Run {
            tenants,
            index_path,
            deadline_secs,
            keep_removed,
            json,
        } => {
            run_ingestion(
                &global,
                RunOptions {
                    tenants,
                    index_path,
                    deadline_secs,
                    keep_removed,
                    json,
                },
            )
            .await?;
        }
        Commands::Status { tenant } => {
            show_status(&global, tenant.as_deref())?;
        }
        Commands::Runs { limit, json } => {
            list_runs(&global, limit, json)?;
        }
        Commands::Config => {
            show_config(&global)?;
        }
    }

    Ok(())
}
