//! ZeroMQ endpoints and a blocking request/reply client.
//!
//! The server side is a `REP` socket and clients are `REQ` sockets, so one
//! request message is always answered by exactly one reply message. Message
//! boundaries and size limits are enforced by the transport.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::trace;

use crate::error::{Error, Result};

/// Default upper bound on a request message.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// The `tcp://` endpoint for a socket address.
///
/// Port 0 becomes the wildcard port, so the OS picks a free one.
#[must_use]
pub fn endpoint(address: SocketAddr) -> String {
    if address.port() != 0 {
        return format!("tcp://{address}");
    }
    match address {
        SocketAddr::V4(v4) => format!("tcp://{}:*", v4.ip()),
        SocketAddr::V6(v6) => format!("tcp://[{}]:*", v6.ip()),
    }
}

/// Turn a user-supplied address into an endpoint.
///
/// Anything that already names a transport (`tcp://`, `ipc://`) is kept;
/// a bare `host:port` is read as TCP.
#[must_use]
pub fn client_endpoint(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("tcp://{address}")
    }
}

/// Socket timeout option value: milliseconds, or -1 to wait forever.
fn timeout_millis(timeout: Option<Duration>) -> i32 {
    timeout.map_or(-1, |t| i32::try_from(t.as_millis()).unwrap_or(i32::MAX))
}

/// Blocking client for the ingestion endpoint.
pub struct Client {
    socket: zmq::Socket,
    endpoint: String,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connect to a server at `address` (`host:port` or a full endpoint).
    ///
    /// The connection itself is established in the background; a server
    /// that is not running shows up as [`Error::Timeout`] on the first
    /// request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the socket cannot be created or the
    /// endpoint is malformed.
    pub fn connect(address: &str) -> Result<Self> {
        let endpoint = client_endpoint(address);
        let connect_err = |source| Error::Connect {
            address: address.to_string(),
            source,
        };

        let socket = zmq::Context::new().socket(zmq::REQ).map_err(connect_err)?;
        // Never block process exit on an unanswered request, and allow a
        // new request after a timed-out one.
        socket.set_linger(0).map_err(connect_err)?;
        socket.set_req_relaxed(true).map_err(connect_err)?;
        socket.set_req_correlate(true).map_err(connect_err)?;
        socket.connect(&endpoint).map_err(connect_err)?;

        trace!(%endpoint, "Client socket connected");
        Ok(Self { socket, endpoint })
    }

    /// The endpoint this client talks to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Bound how long a request may wait to be sent and answered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the socket option cannot be set.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let millis = timeout_millis(timeout);
        self.socket.set_sndtimeo(millis)?;
        self.socket.set_rcvtimeo(millis)?;
        Ok(())
    }

    /// Send one request and wait for its reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no reply arrives in time (including a
    /// server that dropped an oversized request), or [`Error::Transport`]
    /// for any other socket failure.
    pub fn request(&mut self, payload: &[u8]) -> Result<String> {
        self.socket.send(payload, 0).map_err(|e| self.request_error(e))?;
        let reply = self.socket.recv_bytes(0).map_err(|e| self.request_error(e))?;
        trace!(sent = payload.len(), received = reply.len(), "Request answered");
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    /// Send `ping` and check for `pong`.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub fn ping(&mut self) -> Result<bool> {
        Ok(self.request(b"ping")? == "pong")
    }

    fn request_error(&self, err: zmq::Error) -> Error {
        match err {
            zmq::Error::EAGAIN => Error::Timeout {
                address: self.endpoint.clone(),
            },
            other => Error::Transport(other),
        }
    }
}
