//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::config::Config;
use crate::error::Result;

/// Serve command arguments.
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Address to listen on (overrides `server.bind_address`)
    #[arg(short, long, value_name = "ADDR")]
    pub bind: Option<SocketAddr>,

    /// Run without the console dashboard
    #[arg(long)]
    pub no_monitor: bool,
}

/// Connection arguments shared by the client commands.
#[derive(Debug, Clone, Args)]
pub struct ClientArgs {
    /// Server address as `host:port` or a `tcp://` endpoint (defaults to the configured port on localhost)
    #[arg(short, long, value_name = "ADDR")]
    pub address: Option<String>,

    /// Reply timeout in milliseconds
    #[arg(long, value_name = "MS", default_value = "5000")]
    pub timeout_ms: u64,
}

impl ClientArgs {
    /// The address to connect to.
    ///
    /// Without `--address`, the configured bind address is used with an
    /// unspecified host replaced by loopback.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured bind address does not parse.
    pub fn resolve(&self, config: &Config) -> Result<String> {
        if let Some(address) = &self.address {
            return Ok(address.clone());
        }
        let mut bind = config.bind_addr()?;
        if bind.ip().is_unspecified() {
            bind.set_ip([127, 0, 0, 1].into());
        }
        Ok(bind.to_string())
    }

    /// The reply timeout, or `None` for 0.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Send command arguments.
#[derive(Debug, Args)]
pub struct SendCommand {
    /// JSON payload to ingest
    pub payload: String,

    /// Connection options
    #[command(flatten)]
    pub client: ClientArgs,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Clear command arguments.
#[derive(Debug, Args)]
pub struct ClearCommand {
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
