//! Command-line interface for trackpoint.
//!
//! This module provides the CLI structure for the `trackpt` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ClearCommand, ClientArgs, ConfigCommand, SendCommand, ServeCommand, StatusCommand,
};

/// trackpt - Telemetry ingestion for mobile clients
///
/// Receives location, telephony and traffic samples over a request/reply
/// channel, keeps a bounded history in memory and appends accepted samples
/// to JSON collections on disk.
#[derive(Debug, Parser)]
#[command(name = "trackpt")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the ingestion server
    Serve(ServeCommand),

    /// Check that a server answers
    Ping(ClientArgs),

    /// Print a server's recent history
    Show(ClientArgs),

    /// Send one JSON sample to a server
    Send(SendCommand),

    /// Summarize the persisted collections
    Status(StatusCommand),

    /// Truncate every persisted file
    Clear(ClearCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.verbose, self.quiet)
    }
}
