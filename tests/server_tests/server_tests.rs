//! Cache Server Tests
//!
//! Tests for the in-memory store and raw protocol sessions.

use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use protocache::protocol::{
    decode_auth_reply, decode_response, encode_auth, encode_request, read_frame, write_frame,
    Frame, Opcode, Request, HANDSHAKE_ID,
};
use protocache::server::{CacheServer, MemoryStore, ServerOptions};
use protocache::CacheError;

// =============================================================================
// Helper Functions
// =============================================================================

fn start_server(token: Option<&str>) -> CacheServer {
    CacheServer::start(
        "127.0.0.1:0",
        ServerOptions {
            token: token.map(str::to_string),
        },
    )
    .unwrap()
}

/// Open a raw session and complete the handshake
fn open_session(server: &CacheServer, token: &str) -> TcpStream {
    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    write_frame(&mut stream, &encode_auth(token)).unwrap();
    let reply = read_frame(&mut stream).unwrap();
    assert_eq!(reply.correlation_id, HANDSHAKE_ID);
    decode_auth_reply(&reply).unwrap();
    stream
}

// =============================================================================
// Store Tests
// =============================================================================

#[test]
fn test_store_get_set() {
    let store = MemoryStore::new();
    assert!(store.is_empty());

    store.set("c".to_string(), Bytes::from("k"), Bytes::from("v"), None);
    assert_eq!(store.get("c", b"k"), Some(Bytes::from("v")));
    assert_eq!(store.get("c", b"other"), None);
    assert_eq!(store.get("other", b"k"), None);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_store_overwrite() {
    let store = MemoryStore::new();
    store.set("c".to_string(), Bytes::from("k"), Bytes::from("v1"), None);
    store.set("c".to_string(), Bytes::from("k"), Bytes::from("v2"), None);

    assert_eq!(store.get("c", b"k"), Some(Bytes::from("v2")));
    assert_eq!(store.len(), 1);
}

#[test]
fn test_store_caches_are_separate() {
    let store = MemoryStore::new();
    store.set("a".to_string(), Bytes::from("k"), Bytes::from("in-a"), None);
    store.set("b".to_string(), Bytes::from("k"), Bytes::from("in-b"), None);

    assert_eq!(store.get("a", b"k"), Some(Bytes::from("in-a")));
    assert_eq!(store.get("b", b"k"), Some(Bytes::from("in-b")));
}

#[test]
fn test_store_ttl_expiry_purges() {
    let store = MemoryStore::new();
    store.set(
        "c".to_string(),
        Bytes::from("k"),
        Bytes::from("v"),
        Some(Duration::from_millis(30)),
    );
    assert!(store.get("c", b"k").is_some());

    thread::sleep(Duration::from_millis(80));
    assert_eq!(store.get("c", b"k"), None);
    assert!(store.is_empty());
}

#[test]
fn test_store_execute() {
    let store = MemoryStore::new();

    assert!(store.execute(Request::get("c", "k")).is_miss());
    assert!(store
        .execute(Request::set("c", "k", "v", None))
        .is_success());
    assert_eq!(
        store.execute(Request::get("c", "k")).value(),
        Some(&Bytes::from("v"))
    );
}

// =============================================================================
// Session Tests
// =============================================================================

#[test]
fn test_session_echoes_correlation_ids() {
    let server = start_server(Some("secret"));
    let mut stream = open_session(&server, "secret");

    write_frame(
        &mut stream,
        &encode_request(41, &Request::set("c", "k", "v", None)).unwrap(),
    )
    .unwrap();
    write_frame(&mut stream, &encode_request(42, &Request::get("c", "k")).unwrap()).unwrap();

    let first = read_frame(&mut stream).unwrap();
    assert_eq!(first.correlation_id, 41);
    assert!(decode_response(&first).unwrap().is_success());

    let second = read_frame(&mut stream).unwrap();
    assert_eq!(second.correlation_id, 42);
    assert_eq!(
        decode_response(&second).unwrap().value(),
        Some(&Bytes::from("v"))
    );
    assert_eq!(server.requests_received(), 2);
}

#[test]
fn test_session_rejects_wrong_token() {
    let server = start_server(Some("secret"));
    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    write_frame(&mut stream, &encode_auth("guess")).unwrap();
    let reply = read_frame(&mut stream).unwrap();
    assert!(matches!(
        decode_auth_reply(&reply),
        Err(CacheError::AuthRejected(_))
    ));

    // The server hangs up after a rejection
    assert!(read_frame(&mut stream).is_err());
}

#[test]
fn test_session_without_configured_token_rejects_empty() {
    let server = start_server(None);
    let _ok = open_session(&server, "anything");

    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    write_frame(&mut stream, &encode_auth("")).unwrap();
    let reply = read_frame(&mut stream).unwrap();
    assert!(matches!(
        decode_auth_reply(&reply),
        Err(CacheError::AuthRejected(_))
    ));
}

#[test]
fn test_session_closed_on_malformed_request() {
    let server = start_server(None);
    let mut stream = open_session(&server, "token");

    // A response opcode is not a valid request
    write_frame(&mut stream, &Frame::empty(Opcode::Success, 5)).unwrap();
    assert!(read_frame(&mut stream).is_err());
}

// =============================================================================
// Control Tests
// =============================================================================

#[test]
fn test_paused_responses_are_held_then_flushed_in_order() {
    let server = start_server(None);
    let mut stream = open_session(&server, "token");

    server.pause_responses();
    for id in 1..=3 {
        let request = Request::set("c", format!("k{}", id), "v", None);
        write_frame(&mut stream, &encode_request(id, &request).unwrap()).unwrap();
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while server.held_responses() < 3 {
        assert!(std::time::Instant::now() < deadline);
        thread::sleep(Duration::from_millis(2));
    }
    // Requests were executed even though nothing was answered
    assert_eq!(server.store().len(), 3);

    server.resume_responses();
    for id in 1..=3 {
        assert_eq!(read_frame(&mut stream).unwrap().correlation_id, id);
    }
    assert_eq!(server.held_responses(), 0);
}

#[test]
fn test_drop_connections_closes_sessions() {
    let server = start_server(None);
    let mut stream = open_session(&server, "token");
    assert_eq!(server.active_connections(), 1);

    assert_eq!(server.drop_connections(), 1);
    assert!(read_frame(&mut stream).is_err());
    assert_eq!(server.active_connections(), 0);
}

#[test]
fn test_shutdown_stops_accepting() {
    let server = start_server(None);
    let addr = server.local_addr();
    let _session = open_session(&server, "token");

    server.shutdown();
    assert_eq!(server.active_connections(), 0);

    // Either the connect fails or the connection is never served
    if let Ok(mut stream) = TcpStream::connect(addr) {
        stream
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let _ = write_frame(&mut stream, &encode_auth("token"));
        assert!(read_frame(&mut stream).is_err());
    }
}
