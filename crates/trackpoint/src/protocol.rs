//! Request handling for the ingestion endpoint.
//!
//! Every request message maps to exactly one [`Reply`]. State changes and file
//! writes happen only when a sample is accepted.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::sample::Sample;
use crate::storage::PersistenceWriter;
use crate::store::RecordStore;

/// Default number of entries rendered by `show`.
pub const DEFAULT_SHOW_LIMIT: usize = 10;

/// Body of the `show` reply when history is empty.
pub const NO_DATA: &str = "No data";

/// A classified request message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    /// Health probe.
    Ping,
    /// Dump of recent history.
    Show,
    /// Anything else, to be decoded as a sample.
    Ingest(&'a [u8]),
}

impl<'a> Request<'a> {
    /// Classify raw request bytes.
    ///
    /// Control literals match after trimming surrounding ASCII whitespace.
    #[must_use]
    pub fn parse(bytes: &'a [u8]) -> Self {
        match bytes.trim_ascii() {
            b"ping" => Self::Ping,
            b"show" => Self::Show,
            _ => Self::Ingest(bytes),
        }
    }

    /// Whether this is a control request (no ingestion attempted).
    #[must_use]
    pub fn is_control(&self) -> bool {
        !matches!(self, Self::Ingest(_))
    }
}

/// The reply to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Answer to `ping`.
    Pong,
    /// Answer to `show`.
    Show(String),
    /// Sample accepted under this id.
    Accepted(u64),
    /// The body was not JSON.
    InvalidPayload,
    /// The body lacked identifying fields.
    MissingFields,
    /// Any other per-request failure.
    Failure(String),
}

impl Reply {
    /// Whether the request was accepted or answered successfully.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Pong | Self::Show(_) | Self::Accepted(_))
    }

    /// Encode the reply as message bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Show(body) => body.into_bytes(),
            other => other.to_string().into_bytes(),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pong => f.write_str("pong"),
            Self::Show(body) => f.write_str(body),
            Self::Accepted(id) => write!(f, "OK:{id}"),
            Self::InvalidPayload => f.write_str("ERROR:Invalid JSON"),
            Self::MissingFields => f.write_str("ERROR:No lat/lon"),
            Self::Failure(message) => write!(f, "ERROR:{message}"),
        }
    }
}

impl From<Error> for Reply {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidPayload(_) => Self::InvalidPayload,
            Error::MissingFields => Self::MissingFields,
            other => Self::Failure(other.to_string()),
        }
    }
}

/// Decodes, validates, records and persists requests.
#[derive(Debug)]
pub struct ProtocolHandler {
    store: Arc<RecordStore>,
    writer: Arc<PersistenceWriter>,
    show_limit: usize,
}

impl ProtocolHandler {
    /// Create a handler over a shared store and a shared writer.
    #[must_use]
    pub fn new(store: Arc<RecordStore>, writer: Arc<PersistenceWriter>) -> Self {
        Self {
            store,
            writer,
            show_limit: DEFAULT_SHOW_LIMIT,
        }
    }

    /// Set how many entries `show` renders.
    #[must_use]
    pub fn with_show_limit(mut self, limit: usize) -> Self {
        self.show_limit = limit.max(1);
        self
    }

    /// The store this handler mutates.
    #[must_use]
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// The writer accepted samples are persisted through.
    #[must_use]
    pub fn writer(&self) -> &Arc<PersistenceWriter> {
        &self.writer
    }

    /// Handle one request message.
    pub fn handle(&self, bytes: &[u8]) -> Reply {
        let request = Request::parse(bytes);
        match request {
            Request::Ping => Reply::Pong,
            Request::Show => Reply::Show(self.render_show()),
            Request::Ingest(body) => {
                if self.store.mark_client_connected() {
                    info!("First client data received");
                }
                match self.ingest(body) {
                    Ok(id) => Reply::Accepted(id),
                    Err(e) => {
                        if e.is_client_error() {
                            debug!(error = %e, bytes = body.len(), "Rejected request");
                        } else {
                            warn!(error = %e, bytes = body.len(), "Request failed");
                        }
                        Reply::from(e)
                    }
                }
            }
        }
    }

    fn ingest(&self, body: &[u8]) -> crate::Result<u64> {
        let sample = Sample::decode(body)?;
        let id = self.store.apply(&sample);
        // Write failures are logged by the writer; the client still gets
        // its id because the sample is already in the store.
        self.writer.persist(id, &sample);
        debug!(id, kind = %sample.kind(), "Accepted sample");
        Ok(id)
    }

    /// Render recent history, newest first.
    #[must_use]
    pub fn render_show(&self) -> String {
        let recent = self.store.recent(self.show_limit);
        if recent.is_empty() {
            return NO_DATA.to_string();
        }
        recent
            .iter()
            .enumerate()
            .map(|(index, entry)| format!("{}. {}", index + 1, entry.payload))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
