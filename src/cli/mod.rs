//! Command-line interface for the orchestrator.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Orchestrator - policy-gated suspension of hosts and applications.
#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, env = "ORCHESTRATOR_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the orchestrator server
    Serve {
        /// Configuration file path
        #[arg(short, long, env = "ORCHESTRATOR_CONFIG")]
        config: Option<PathBuf>,

        /// Override the bind address from the configuration
        #[arg(long)]
        bind_addr: Option<String>,
    },

    /// Host operations
    Host {
        #[command(subcommand)]
        command: HostCommands,

        /// Orchestrator server address
        #[arg(short, long, env = "ORCHESTRATOR_ADDR", default_value = "127.0.0.1:19071", global = true)]
        addr: String,
    },

    /// Suspend several hosts on behalf of a parent host, all or nothing
    SuspendAll {
        /// Parent host
        parent: String,

        /// Hosts to suspend
        #[arg(required = true)]
        hosts: Vec<String>,

        /// Orchestrator server address
        #[arg(short, long, env = "ORCHESTRATOR_ADDR", default_value = "127.0.0.1:19071")]
        addr: String,
    },

    /// Application instance operations
    App {
        #[command(subcommand)]
        command: AppCommands,

        /// Orchestrator server address
        #[arg(short, long, env = "ORCHESTRATOR_ADDR", default_value = "127.0.0.1:19071", global = true)]
        addr: String,
    },

    /// Show version information
    Version,
}

/// Host subcommands.
#[derive(Subcommand)]
pub enum HostCommands {
    /// Show the status of a host
    Status { host: String },
    /// Suspend a host
    Suspend { host: String },
    /// Resume a suspended host
    Resume { host: String },
    /// Ask for permission to permanently remove a host
    Remove { host: String },
}

/// Application subcommands. Applications are `tenant:application:environment:region:instance`.
#[derive(Subcommand)]
pub enum AppCommands {
    /// Show the status of an application instance
    Status { application: String },
    /// Suspend every host of an application instance
    Suspend { application: String },
    /// Resume an application instance
    Resume { application: String },
    /// Check whether an application instance could be taken down now
    Quiescent { application: String },
    /// List suspended application instances
    Suspended,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
