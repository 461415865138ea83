//! CLI argument parsing for `ingestd`.
//!
//! Flags given here override every other configuration source.

use clap::{Parser, Subcommand};

/// Incremental ingestion engine
///
/// Turns the documents of configured tenant sources into vector index
/// points, reprocessing only what changed since the last run.
#[derive(Parser, Debug)]
#[command(name = "ingestd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/ingest-engine/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override state database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute one ingestion run
    Run {
        /// Only ingest these tenants (repeatable); all tenants by default
        #[arg(short, long = "tenant")]
        tenants: Vec<String>,

        /// Override vector index path
        #[arg(long)]
        index_path: Option<String>,

        /// Cancel the run after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Keep index points of documents that disappeared from their source
        #[arg(long)]
        keep_removed: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show per-tenant document counts from the state store
    Status {
        /// Only show this tenant
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// List recent runs, newest first
    Runs {
        /// Maximum runs to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        /// Print runs as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML (secrets redacted)
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_run_defaults() {
        let cli = Cli::parse_from(["ingestd", "run"]);
        match cli.command {
            Commands::Run {
                tenants,
                index_path,
                deadline_secs,
                keep_removed,
                json,
            } => {
                assert!(tenants.is_empty());
                assert!(index_path.is_none());
                assert!(deadline_secs.is_none());
                assert!(!keep_removed);
                assert!(!json);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_run_with_tenants() {
        let cli = Cli::parse_from([
            "ingestd",
            "run",
            "--tenant",
            "acme",
            "-t",
            "globex",
            "--deadline-secs",
            "60",
        ]);
        match cli.command {
            Commands::Run {
                tenants,
                deadline_secs,
                ..
            } => {
                assert_eq!(tenants, vec!["acme".to_string(), "globex".to_string()]);
                assert_eq!(deadline_secs, Some(60));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "ingestd",
            "--log-level",
            "debug",
            "status",
            "--db-path",
            "/custom/db",
        ]);
        assert_eq!(cli.log_level, Some("debug".to_string()));
        assert_eq!(cli.db_path, Some("/custom/db".to_string()));
        assert!(matches!(cli.command, Commands::Status { tenant: None }));
    }

    #[test]
    fn test_cli_runs_limit() {
        let cli = Cli::parse_from(["ingestd", "runs", "-n", "3", "--json"]);
        match cli.command {
            Commands::Runs { limit, json } => {
                assert_eq!(limit, 3);
                assert!(json);
            }
            _ => panic!("Expected Runs command"),
        }
    }

    #[test]
    fn test_cli_config() {
        let cli = Cli::parse_from(["ingestd", "--config", "/etc/ingest.toml", "config"]);
        assert_eq!(cli.config, Some("/etc/ingest.toml".to_string()));
        assert!(matches!(cli.command, Commands::Config));
    }
}
