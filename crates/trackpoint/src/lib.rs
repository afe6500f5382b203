//! `trackpoint` - Telemetry ingestion for mobile clients
//!
//! This library provides the ingestion engine behind the `trackpt` binary:
//! sample decoding, the bounded in-memory record store, durable append of
//! accepted samples, the request/reply protocol and its ZeroMQ server, and a
//! read-only monitor with two administrative actions.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod protocol;
pub mod sample;
pub mod server;
pub mod storage;
pub mod store;
pub mod wire;

pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use monitor::{Monitor, MonitorHandle};
pub use protocol::{ProtocolHandler, Reply, Request};
pub use sample::{Sample, SampleKind};
pub use server::IngestionServer;
pub use storage::{PersistenceWriter, StorageStats};
pub use store::{RecordStore, Snapshot};
pub use wire::Client;
