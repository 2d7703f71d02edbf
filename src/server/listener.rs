//! TCP Server
//!
//! Accepts connections and runs one handler thread per client.

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::error::Result;
use crate::protocol::{write_frame, Frame};

use super::connection::{Connection, SharedWriter};
use super::MemoryStore;

/// Server settings
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Token clients must present; `None` accepts any non-empty token
    pub token: Option<String>,
}

/// Responses parked while the server is paused
#[derive(Default)]
pub(crate) struct HeldResponses {
    pub paused: bool,
    pub frames: Vec<(SharedWriter, Frame)>,
}

/// State shared by the acceptor and every connection handler
pub(crate) struct ServerShared {
    pub store: MemoryStore,
    pub token: Option<String>,
    pub held: Mutex<HeldResponses>,
    pub requests_received: AtomicU64,

    /// Socket handles of live connections, for `drop_connections`
    sessions: Mutex<HashMap<u64, TcpStream>>,
    next_session: AtomicU64,
    connections_accepted: AtomicU64,
    shutdown: AtomicBool,
}

/// In-memory cache service speaking the ProtoCache wire protocol
pub struct CacheServer {
    shared: Arc<ServerShared>,
    local_addr: SocketAddr,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl CacheServer {
    /// Bind `addr` and start accepting connections
    ///
    /// Use port 0 to pick an ephemeral port; see `local_addr`.
    pub fn start(addr: &str, options: ServerOptions) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(ServerShared {
            store: MemoryStore::new(),
            token: options.token,
            held: Mutex::new(HeldResponses::default()),
            requests_received: AtomicU64::new(0),
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            connections_accepted: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });

        let acceptor_shared = Arc::clone(&shared);
        let acceptor = thread::Builder::new()
            .name("protocache-acceptor".to_string())
            .spawn(move || accept_loop(listener, acceptor_shared))?;

        tracing::info!("Cache server listening on {}", local_addr);

        Ok(Self {
            shared,
            local_addr,
            acceptor: Mutex::new(Some(acceptor)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address clients should dial (host:port)
    pub fn endpoint(&self) -> String {
        self.local_addr.to_string()
    }

    pub fn store(&self) -> &MemoryStore {
        &self.shared.store
    }

    pub fn connections_accepted(&self) -> u64 {
        self.shared.connections_accepted.load(Ordering::SeqCst)
    }

    /// Request frames read so far, across all connections
    pub fn requests_received(&self) -> u64 {
        self.shared.requests_received.load(Ordering::SeqCst)
    }

    pub fn active_connections(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    /// Keep executing requests but hold their responses
    pub fn pause_responses(&self) {
        self.shared.held.lock().paused = true;
    }

    /// Send every held response, in arrival order, and stop holding
    pub fn resume_responses(&self) {
        let mut held = self.shared.held.lock();
        for (writer, frame) in held.frames.drain(..) {
            if let Err(e) = write_frame(&mut *writer.lock(), &frame) {
                tracing::debug!("Dropping held response {}: {}", frame.correlation_id, e);
            }
        }
        held.paused = false;
    }

    /// Number of responses currently held
    pub fn held_responses(&self) -> usize {
        self.shared.held.lock().frames.len()
    }

    /// Abruptly close every client connection
    pub fn drop_connections(&self) -> usize {
        let sessions: Vec<TcpStream> = self.shared.sessions.lock().drain().map(|(_, s)| s).collect();
        for stream in &sessions {
            let _ = stream.shutdown(Shutdown::Both);
        }

        // Held responses for those connections can never be delivered
        self.shared.held.lock().frames.clear();

        tracing::debug!("Dropped {} client connections", sessions.len());
        sessions.len()
    }

    /// Stop accepting and close every connection
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        // Wake the acceptor out of its blocking accept
        let _ = TcpStream::connect(self.local_addr);
        if let Some(handle) = self.acceptor.lock().take() {
            let _ = handle.join();
        }

        self.drop_connections();
        tracing::info!("Cache server on {} stopped", self.local_addr);
    }
}

impl Drop for CacheServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<ServerShared>) {
    for stream in listener.incoming() {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                continue;
            }
        };

        if let Err(e) = spawn_session(stream, Arc::clone(&shared)) {
            tracing::warn!("Failed to start connection handler: {}", e);
        }
    }
}

fn spawn_session(stream: TcpStream, shared: Arc<ServerShared>) -> Result<()> {
    let session_id = shared.next_session.fetch_add(1, Ordering::Relaxed);
    let mut connection = Connection::new(stream.try_clone()?, Arc::clone(&shared))?;

    shared.sessions.lock().insert(session_id, stream);
    shared.connections_accepted.fetch_add(1, Ordering::SeqCst);

    thread::Builder::new()
        .name(format!("protocache-session-{}", session_id))
        .spawn(move || {
            if let Err(e) = connection.handle() {
                tracing::debug!("Session {} ended with error: {}", session_id, e);
            }
            shared.sessions.lock().remove(&session_id);
        })?;

    Ok(())
}
