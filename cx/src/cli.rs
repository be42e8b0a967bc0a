//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ClusterCtx - coordination for distributed load-test runners
#[derive(Parser)]
#[command(
    name = "cx",
    about = "Coordinate a group of load-test agents behind one barrier",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run as coordinator: host the server and wait for all agents
    Serve,

    /// Join the cluster with the configured role and wait for the barrier
    Sync,

    /// Store a raw value on the coordinator
    Set {
        /// Key to write
        key: String,

        /// Value to store
        value: String,
    },

    /// Read a value from the coordinator, polling until it appears
    Get {
        /// Key to read
        key: String,

        /// Polling attempts (defaults to the configured value policy)
        #[arg(short, long)]
        attempts: Option<u32>,
    },

    /// Show how many executors registered for a scenario
    Count {
        /// Scenario name
        scenario: String,
    },
}
