use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "campus-notify",
    about = "Watch and manage campus scheduling notifications",
    version
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "CAMPUS_NOTIFY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Backend base URL, overrides the configuration file
    #[arg(long, global = true, env = "CAMPUS_NOTIFY_BASE_URL")]
    pub base_url: Option<String>,

    /// Bearer token, overrides the one stored in the session file
    #[arg(long, global = true, env = "CAMPUS_NOTIFY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Session file holding the bearer token and the registered device token
    #[arg(long, global = true, env = "CAMPUS_NOTIFY_SESSION_FILE")]
    pub session_file: Option<PathBuf>,

    /// Also write daily-rolling log files to this directory
    #[arg(long, global = true, env = "CAMPUS_NOTIFY_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Follow notifications live until interrupted
    Watch,

    /// List one page of notifications
    List {
        /// Zero-based page number
        #[arg(short, long, default_value_t = 0)]
        page: u32,

        /// Page size, defaults to the configured page size
        #[arg(short, long)]
        size: Option<u32>,

        /// Only unread notifications
        #[arg(short, long)]
        unread_only: bool,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the unread notification count
    Unread,

    /// Mark one notification read
    Read {
        id: i64,
    },

    /// Mark every notification read
    ReadAll,

    /// Mark several notifications read
    ReadBatch {
        #[arg(required = true, num_args = 1..)]
        ids: Vec<i64>,
    },

    /// Delete one or more notifications
    Delete {
        #[arg(required = true, num_args = 1..)]
        ids: Vec<i64>,
    },

    /// Register a push token for this device
    RegisterDevice {
        /// Platform push token
        #[arg(long)]
        device_token: String,

        /// Platform tag, defaults to the configured platform
        #[arg(long)]
        platform: Option<String>,
    },

    /// Run a push payload (JSON file) through push ingestion
    Push {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show the effective configuration
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_batch_ids() {
        let args = Args::try_parse_from(["campus-notify", "read-batch", "3", "4", "5"]).unwrap();
        match args.command {
            Commands::ReadBatch { ids } => assert_eq!(ids, vec![3, 4, 5]),
            _ => panic!("expected read-batch"),
        }
    }

    #[test]
    fn test_delete_requires_ids() {
        assert!(Args::try_parse_from(["campus-notify", "delete"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "campus-notify",
            "list",
            "--unread-only",
            "--base-url",
            "http://example.test",
        ])
        .unwrap();
        assert_eq!(args.base_url.as_deref(), Some("http://example.test"));
        assert!(matches!(
            args.command,
            Commands::List {
                unread_only: true,
                ..
            }
        ));
    }
}
