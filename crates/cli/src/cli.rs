use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fleetpulse", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file path
    #[arg(short, long, value_name = "FILE")]
    pub config_path: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway, presence reconciler and notification delivery
    Serve {
        /// Gateway host
        #[arg(long)]
        host: Option<String>,

        /// Gateway port
        #[arg(short, long)]
        port: Option<u16>,

        /// Development mode (verbose logging)
        #[arg(short, long)]
        dev: bool,
    },

    /// Generate sample configuration
    ConfigSample {
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Create an API token for a user and print it once
    IssueToken {
        /// User the token authenticates as
        user_id: String,
    },

    /// Revoke every API token of a user
    RevokeTokens {
        /// User whose tokens are removed
        user_id: String,
    },

    /// Run a single presence reconciliation pass and print the report
    Reconcile,
}
