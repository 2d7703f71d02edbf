//! Pooled Connection
//!
//! One authenticated connection to the cache service plus its reader thread.

use std::io::{BufWriter, ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Config;
use crate::credentials::Credentials;
use crate::error::{CacheError, Result};
use crate::protocol::{
    decode_auth_reply, decode_response, encode_auth, read_frame, write_frame, Frame,
    FrameDecoder, HANDSHAKE_ID,
};
use crate::tracker::{ConnectionId, RequestTracker};

/// An authenticated connection shared by many in-flight requests
pub struct Connection {
    /// Pool-unique id; tracker entries sent on this connection carry it
    id: ConnectionId,

    /// Peer address for logging
    peer_addr: String,

    /// TCP stream writer (buffered, one frame at a time)
    writer: Mutex<BufWriter<TcpStream>>,

    /// Handle used to tear the socket down from any thread
    socket: TcpStream,

    /// Set once the connection is unusable; never cleared
    closed: Arc<AtomicBool>,

    /// Reader thread, taken on close
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Dial `endpoint`, authenticate, and start the reader thread
    pub fn establish(
        id: ConnectionId,
        endpoint: &str,
        credentials: &Credentials,
        config: &Config,
        tracker: Arc<RequestTracker>,
    ) -> Result<Arc<Self>> {
        let stream = dial(endpoint, config.connect_timeout)?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| endpoint.to_string());

        handshake(&stream, credentials, config.connect_timeout).map_err(|e| match e {
            CacheError::Io(io_err) => CacheError::NoConnection(format!(
                "handshake with {} failed: {}",
                peer_addr, io_err
            )),
            other => other,
        })?;

        // A peer that stops reading must not stall writers past the request timeout
        stream.set_write_timeout(Some(config.timeout))?;

        // Clone stream for separate read/write/shutdown handles
        let read_stream = stream.try_clone()?;
        let socket = stream.try_clone()?;
        let closed = Arc::new(AtomicBool::new(false));

        let reader = ConnectionReader {
            id,
            peer_addr: peer_addr.clone(),
            stream: read_stream,
            tracker,
            closed: Arc::clone(&closed),
            buffer_size: config.read_buffer_size,
        };
        let handle = thread::Builder::new()
            .name(format!("protocache-conn-{}", id))
            .spawn(move || reader.run())?;

        tracing::debug!("Connection {} established to {}", id, peer_addr);

        Ok(Arc::new(Self {
            id,
            peer_addr,
            writer: Mutex::new(BufWriter::new(stream)),
            socket,
            closed,
            reader: Mutex::new(Some(handle)),
        }))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Write one frame
    ///
    /// Fails with `ConnectionLost` if the connection is dead or the write
    /// fails; a failed write also closes the connection so the reader
    /// thread fails everything else it owns. Writes time out after the
    /// configured request timeout, so a peer that stops reading closes the
    /// connection instead of blocking the caller.
    pub fn send(&self, frame: &Frame) -> Result<()> {
        let mut writer = self.writer.lock();
        if self.is_closed() {
            return Err(CacheError::ConnectionLost);
        }

        if let Err(e) = write_frame(&mut *writer, frame) {
            tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
            drop(writer);
            self.close();
            return Err(CacheError::ConnectionLost);
        }

        tracing::trace!(
            "Sent {:?} frame {} to {}",
            frame.opcode,
            frame.correlation_id,
            self.peer_addr
        );
        Ok(())
    }

    /// Mark the connection dead and shut the socket down
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Closing connection {} to {}", self.id, self.peer_addr);
        }
        let _ = self.socket.shutdown(Shutdown::Both);
    }

    /// Wait for the reader thread to finish
    ///
    /// A no-op when called from the reader thread itself (a callback that
    /// shuts the client down).
    pub fn join_reader(&self) {
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Connect to the first reachable address for `endpoint`
fn dial(endpoint: &str, timeout: Duration) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = endpoint
        .to_socket_addrs()
        .map_err(|e| CacheError::NoConnection(format!("cannot resolve {}: {}", endpoint, e)))?
        .collect();

    let mut last_err = None;
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(CacheError::NoConnection(match last_err {
        Some(e) => format!("cannot connect to {}: {}", endpoint, e),
        None => format!("{} resolved to no addresses", endpoint),
    }))
}

/// Present the token and wait for the verdict
fn handshake(stream: &TcpStream, credentials: &Credentials, timeout: Duration) -> Result<()> {
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let mut io = stream;
    write_frame(&mut io, &encode_auth(&credentials.token))?;
    let reply = read_frame(&mut io)?;
    if reply.correlation_id != HANDSHAKE_ID {
        return Err(CacheError::Protocol(format!(
            "Handshake reply carried correlation id {}",
            reply.correlation_id
        )));
    }
    decode_auth_reply(&reply)?;

    stream.set_read_timeout(None)?;
    Ok(())
}

/// Reader side of a connection; runs on its own thread
struct ConnectionReader {
    id: ConnectionId,
    peer_addr: String,
    stream: TcpStream,
    tracker: Arc<RequestTracker>,
    closed: Arc<AtomicBool>,
    buffer_size: usize,
}

impl ConnectionReader {
    /// Read until the connection ends, then fail whatever it still owns
    fn run(mut self) {
        let result = self.read_loop();

        self.closed.store(true, Ordering::SeqCst);
        let _ = self.stream.shutdown(Shutdown::Both);

        match result {
            Ok(()) => tracing::debug!("Connection {} to {} closed", self.id, self.peer_addr),
            Err(e) => tracing::warn!(
                "Connection {} to {} terminated: {}",
                self.id,
                self.peer_addr,
                e
            ),
        }

        let failed = self.tracker.fail_owned(self.id, CacheError::ConnectionLost);
        if failed > 0 {
            tracing::warn!(
                "Connection {} lost with {} requests in flight",
                self.id,
                failed
            );
        }
    }

    fn read_loop(&mut self) -> Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        let mut decoder = FrameDecoder::with_capacity(self.buffer_size);

        loop {
            let n = match self.stream.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                // Local close: the socket was shut down under us
                Err(_) if self.closed.load(Ordering::SeqCst) => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            decoder.extend(&buf[..n]);
            while let Some(frame) = decoder.next_frame()? {
                self.dispatch(frame)?;
            }
        }
    }

    /// Hand one response frame to the tracker
    fn dispatch(&self, frame: Frame) -> Result<()> {
        if !frame.opcode.is_response() || frame.correlation_id == HANDSHAKE_ID {
            return Err(CacheError::Protocol(format!(
                "Unexpected {:?} frame with correlation id {}",
                frame.opcode, frame.correlation_id
            )));
        }

        let id = frame.correlation_id;
        let response = decode_response(&frame)?;
        if !self.tracker.resolve(id, response) {
            tracing::trace!("Dropping response for unknown request {}", id);
        }
        Ok(())
    }
}
