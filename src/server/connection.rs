//! Connection Handler
//!
//! Handles individual client connections on the service side.

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::TcpStream;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CacheError, Result};
use crate::protocol::{
    decode_auth, decode_request, encode_auth_reply, encode_response, read_frame, write_frame,
    Frame,
};

use super::listener::ServerShared;

/// Writer half shared with `resume_responses`, which flushes held frames
pub(crate) type SharedWriter = Arc<Mutex<BufWriter<TcpStream>>>;

/// Handles a single client connection
pub(crate) struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered, shared)
    writer: SharedWriter,

    /// State shared with the listener
    shared: Arc<ServerShared>,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Create a new connection handler
    pub(crate) fn new(stream: TcpStream, shared: Arc<ServerShared>) -> Result<Self> {
        // Get peer address for logging before we split the stream
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        // Clone stream for separate read/write handles
        let read_stream = stream.try_clone()?;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: Arc::new(Mutex::new(BufWriter::new(stream))),
            shared,
            peer_addr,
        })
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Authenticates, then reads requests in a loop and sends responses.
    /// Returns when the client disconnects or an error occurs.
    pub(crate) fn handle(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);

        if !self.authenticate()? {
            return Ok(());
        }

        loop {
            // Read next request
            let frame = match read_frame(&mut self.reader) {
                Ok(frame) => frame,
                Err(CacheError::Io(ref e)) if is_disconnect(e.kind()) => {
                    tracing::debug!("Client {} disconnected", self.peer_addr);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    return Err(e);
                }
            };

            self.shared.requests_received.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                "Received {:?} frame {} from {}",
                frame.opcode,
                frame.correlation_id,
                self.peer_addr
            );

            // Malformed requests end the connection
            let request = match decode_request(&frame) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!("Malformed request from {}: {}", self.peer_addr, e);
                    return Err(e);
                }
            };

            let response = self.shared.store.execute(request);
            let reply = encode_response(frame.correlation_id, &response);

            if let Err(e) = self.send(reply) {
                if let CacheError::Io(ref io_err) = e {
                    if is_disconnect(io_err.kind()) {
                        tracing::debug!(
                            "Client {} disconnected before response could be sent: {}",
                            self.peer_addr,
                            e
                        );
                        return Ok(());
                    }
                }
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                return Err(e);
            }
        }
    }

    /// Check the handshake token; false if the client was turned away
    fn authenticate(&mut self) -> Result<bool> {
        let frame = read_frame(&mut self.reader)?;
        let token = decode_auth(&frame)?;

        let verdict = match self.shared.token.as_deref() {
            Some(expected) if expected != token => Err("invalid token"),
            _ if token.trim().is_empty() => Err("empty token"),
            _ => Ok(()),
        };

        let accepted = verdict.is_ok();
        if let Err(reason) = verdict {
            tracing::warn!("Rejected client {}: {}", self.peer_addr, reason);
        }

        write_frame(&mut *self.writer.lock(), &encode_auth_reply(verdict))?;
        Ok(accepted)
    }

    /// Send a response, or hold it while responses are paused
    fn send(&self, reply: Frame) -> Result<()> {
        let mut held = self.shared.held.lock();
        if held.paused {
            held.frames.push((Arc::clone(&self.writer), reply));
            return Ok(());
        }
        drop(held);

        write_frame(&mut *self.writer.lock(), &reply)
    }
}

/// Error kinds that mean the peer went away
fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
    )
}

