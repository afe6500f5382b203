//! The ingestion server.
//!
//! A single ZeroMQ `REP` socket receives requests from any number of `REQ`
//! clients. The socket hands over one request at a time and accepts exactly
//! one reply before the next, so the [`ProtocolHandler`] sees requests
//! strictly in arrival order on the serving thread.

use std::fmt;
use std::net::SocketAddr;

use tracing::{info, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::ProtocolHandler;
use crate::wire::{endpoint, DEFAULT_MAX_MESSAGE_BYTES};

/// Owns the listening socket and the protocol handler.
pub struct IngestionServer {
    socket: zmq::Socket,
    handler: ProtocolHandler,
    endpoint: String,
}

impl fmt::Debug for IngestionServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionServer")
            .field("endpoint", &self.endpoint)
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

impl IngestionServer {
    /// Bind the listening endpoint with the default message size limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address cannot be bound.
    pub fn bind(address: SocketAddr, handler: ProtocolHandler) -> Result<Self> {
        Self::bind_with_limit(address, handler, DEFAULT_MAX_MESSAGE_BYTES)
    }

    /// Bind the listening endpoint, rejecting requests above
    /// `max_message_bytes`.
    ///
    /// An oversized request never reaches the handler: the transport drops
    /// the sending peer's connection and that client sees a timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address cannot be bound, or
    /// [`Error::Transport`] if the socket cannot be set up.
    pub fn bind_with_limit(
        address: SocketAddr,
        handler: ProtocolHandler,
        max_message_bytes: usize,
    ) -> Result<Self> {
        let socket = zmq::Context::new().socket(zmq::REP)?;
        let limit = i64::try_from(max_message_bytes.max(1)).unwrap_or(i64::MAX);
        socket.set_maxmsgsize(limit)?;
        socket.set_ipv6(address.is_ipv6())?;
        socket.set_linger(0)?;
        socket
            .bind(&endpoint(address))
            .map_err(|source| Error::bind(address, source))?;

        let endpoint = socket
            .get_last_endpoint()?
            .map_err(|_| Error::internal("bound endpoint is not UTF-8"))?;
        info!(%endpoint, max_message_bytes, "Ingestion server listening");
        Ok(Self {
            socket,
            handler,
            endpoint,
        })
    }

    /// The endpoint actually bound (useful with port 0).
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The address actually bound.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the bound endpoint is not TCP.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.endpoint
            .strip_prefix("tcp://")
            .and_then(|address| address.parse().ok())
            .ok_or_else(|| Error::internal(format!("not a TCP endpoint: {}", self.endpoint)))
    }

    /// Run forever: receive a request, handle it, send its reply.
    ///
    /// Per-request failures become error replies and never end the loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] only if the socket itself fails.
    pub fn serve(self) -> Result<()> {
        loop {
            let request = match self.socket.recv_bytes(0) {
                Ok(request) => request,
                Err(zmq::Error::EINTR) => continue,
                Err(e) => {
                    warn!(error = %e, "Receive failed, stopping ingestion loop");
                    return Err(e.into());
                }
            };

            let reply = self.handler.handle(&request).into_bytes();
            self.send_reply(&reply)?;
            trace!(received = request.len(), sent = reply.len(), "Request served");
        }
    }

    // A REP socket must send before it can receive again, so an interrupted
    // send is retried rather than skipped.
    fn send_reply(&self, reply: &[u8]) -> Result<()> {
        loop {
            match self.socket.send(reply, 0) {
                Ok(()) => return Ok(()),
                Err(zmq::Error::EINTR) => {}
                Err(e) => {
                    warn!(error = %e, "Send failed, stopping ingestion loop");
                    return Err(e.into());
                }
            }
        }
    }
}
