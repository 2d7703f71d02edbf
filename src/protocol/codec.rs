//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Frame Format
//! ```text
//! ┌──────────┬───────────────────┬──────────┬──────────┬─────────────┐
//! │ Op (1)   │ Correlation (8)   │ Len (4)  │ CRC (4)  │   Payload   │
//! └──────────┴───────────────────┴──────────┴──────────┴─────────────┘
//! ```
//!
//! ### Payload by Opcode
//! - AUTH:    token
//! - GET:     cache_len (2) + cache + key_len (4) + key
//! - SET:     cache_len (2) + cache + key_len (4) + key + ttl_ms (8) + value
//! - HIT:     value
//! - MISS / SUCCESS / AUTH_OK: empty
//! - ERROR / AUTH_REJECTED:    utf-8 message

use std::io::{Read, Write};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CacheError, Result};
use super::frame::{CorrelationId, Frame, FrameHeader, Opcode, HANDSHAKE_ID, HEADER_SIZE};
use super::request::{GET_FIXED_LEN, SET_FIXED_LEN};
use super::{Request, Response};

// =============================================================================
// Request Encoding/Decoding
// =============================================================================

/// Encode a request into a frame tagged with `correlation_id`
///
/// Fails with `Validation` for requests that can't be represented on the wire.
pub fn encode_request(correlation_id: CorrelationId, request: &Request) -> Result<Frame> {
    request.validate()?;

    let mut payload = BytesMut::with_capacity(request.payload_len());
    let frame = match request {
        Request::Get { cache_name, key } => {
            put_cache_and_key(&mut payload, cache_name, key);
            Frame::new(Opcode::Get, correlation_id, payload.freeze())
        }
        Request::Set {
            cache_name,
            key,
            value,
            ttl,
        } => {
            put_cache_and_key(&mut payload, cache_name, key);
            payload.put_u64(ttl.map(duration_to_millis).unwrap_or(0));
            payload.extend_from_slice(value);
            Frame::new(Opcode::Set, correlation_id, payload.freeze())
        }
    };

    Ok(frame)
}

fn put_cache_and_key(payload: &mut BytesMut, cache_name: &str, key: &[u8]) {
    payload.put_u16(cache_name.len() as u16);
    payload.extend_from_slice(cache_name.as_bytes());
    payload.put_u32(key.len() as u32);
    payload.extend_from_slice(key);
}

/// Wire ttl in whole milliseconds; 0 is reserved for "no expiry", so any
/// non-zero ttl is at least 1 ms
fn duration_to_millis(ttl: Duration) -> u64 {
    ttl.as_millis().clamp(1, u64::MAX as u128) as u64
}

/// Decode a request frame (service side)
pub fn decode_request(frame: &Frame) -> Result<Request> {
    match frame.opcode {
        Opcode::Get => decode_get_request(frame.payload.clone()),
        Opcode::Set => decode_set_request(frame.payload.clone()),
        other => Err(CacheError::Protocol(format!(
            "Expected a request frame, got {:?}",
            other
        ))),
    }
}

/// Decode GET request payload
fn decode_get_request(mut payload: Bytes) -> Result<Request> {
    if payload.len() < GET_FIXED_LEN {
        return Err(CacheError::Protocol(
            "GET request: missing field lengths".to_string(),
        ));
    }

    let (cache_name, key) = take_cache_and_key(&mut payload, "GET")?;
    if payload.has_remaining() {
        return Err(CacheError::Protocol(format!(
            "GET request: {} trailing bytes",
            payload.remaining()
        )));
    }

    Ok(Request::Get { cache_name, key })
}

/// Decode SET request payload
fn decode_set_request(mut payload: Bytes) -> Result<Request> {
    if payload.len() < SET_FIXED_LEN {
        return Err(CacheError::Protocol(
            "SET request: missing field lengths".to_string(),
        ));
    }

    let (cache_name, key) = take_cache_and_key(&mut payload, "SET")?;
    if payload.remaining() < 8 {
        return Err(CacheError::Protocol("SET request: missing ttl".to_string()));
    }

    let ttl_ms = payload.get_u64();
    let ttl = (ttl_ms > 0).then(|| Duration::from_millis(ttl_ms));

    Ok(Request::Set {
        cache_name,
        key,
        value: payload,
        ttl,
    })
}

/// Read `cache_len + cache + key_len + key` off the front of a payload
fn take_cache_and_key(payload: &mut Bytes, what: &str) -> Result<(String, Bytes)> {
    let cache_len = payload.get_u16() as usize;
    if payload.remaining() < cache_len + 4 {
        return Err(CacheError::Protocol(format!(
            "{} request: incomplete cache name (expected {}, got {})",
            what,
            cache_len,
            payload.remaining()
        )));
    }
    let cache_bytes = payload.split_to(cache_len);
    let cache_name = String::from_utf8(cache_bytes.to_vec()).map_err(|_| {
        CacheError::Protocol(format!("{} request: cache name is not utf-8", what))
    })?;

    let key_len = payload.get_u32() as usize;
    if payload.remaining() < key_len {
        return Err(CacheError::Protocol(format!(
            "{} request: incomplete key (expected {}, got {})",
            what,
            key_len,
            payload.remaining()
        )));
    }
    let key = payload.split_to(key_len);

    Ok((cache_name, key))
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response into a frame (service side)
pub fn encode_response(correlation_id: CorrelationId, response: &Response) -> Frame {
    match response {
        Response::Hit(value) => Frame::new(Opcode::Hit, correlation_id, value.clone()),
        Response::Miss => Frame::empty(Opcode::Miss, correlation_id),
        Response::Success => Frame::empty(Opcode::Success, correlation_id),
        Response::Error(err) => {
            let message = match err {
                CacheError::Service(message) => message.clone(),
                other => other.to_string(),
            };
            Frame::new(Opcode::Error, correlation_id, message.into_bytes())
        }
    }
}

/// Decode a response frame
///
/// Service errors come back as `Response::Error(CacheError::Service(..))`.
pub fn decode_response(frame: &Frame) -> Result<Response> {
    match frame.opcode {
        Opcode::Hit => Ok(Response::Hit(frame.payload.clone())),
        Opcode::Miss => {
            expect_empty(frame)?;
            Ok(Response::Miss)
        }
        Opcode::Success => {
            expect_empty(frame)?;
            Ok(Response::Success)
        }
        Opcode::Error => Ok(Response::Error(CacheError::Service(decode_message(
            &frame.payload,
        )))),
        other => Err(CacheError::Protocol(format!(
            "Expected a response frame, got {:?}",
            other
        ))),
    }
}

fn expect_empty(frame: &Frame) -> Result<()> {
    if !frame.payload.is_empty() {
        return Err(CacheError::Protocol(format!(
            "{:?} response: unexpected payload of {} bytes",
            frame.opcode,
            frame.payload.len()
        )));
    }
    Ok(())
}

fn decode_message(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

// =============================================================================
// Handshake
// =============================================================================

/// Encode the AUTH frame presenting `token`
pub fn encode_auth(token: &str) -> Frame {
    Frame::new(Opcode::Auth, HANDSHAKE_ID, token.as_bytes().to_vec())
}

/// Decode an AUTH frame (service side), returning the token
pub fn decode_auth(frame: &Frame) -> Result<String> {
    if frame.opcode != Opcode::Auth {
        return Err(CacheError::Protocol(format!(
            "Expected AUTH handshake, got {:?}",
            frame.opcode
        )));
    }
    String::from_utf8(frame.payload.to_vec())
        .map_err(|_| CacheError::Protocol("AUTH token is not utf-8".to_string()))
}

/// Encode the handshake reply (service side)
pub fn encode_auth_reply(accepted: std::result::Result<(), &str>) -> Frame {
    match accepted {
        Ok(()) => Frame::empty(Opcode::AuthOk, HANDSHAKE_ID),
        Err(reason) => Frame::new(
            Opcode::AuthRejected,
            HANDSHAKE_ID,
            reason.as_bytes().to_vec(),
        ),
    }
}

/// Decode the handshake reply
pub fn decode_auth_reply(frame: &Frame) -> Result<()> {
    match frame.opcode {
        Opcode::AuthOk => Ok(()),
        Opcode::AuthRejected => Err(CacheError::AuthRejected(decode_message(&frame.payload))),
        other => Err(CacheError::Protocol(format!(
            "Expected handshake reply, got {:?}",
            other
        ))),
    }
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete frame from a stream
///
/// Blocks until a complete frame is received or an error occurs
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    // Read header first
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;
    let header = FrameHeader::parse(&header_bytes)?;

    // Read payload
    let mut payload = vec![0u8; header.payload_len];
    if header.payload_len > 0 {
        reader.read_exact(&mut payload)?;
    }
    header.verify(&payload)?;

    Ok(Frame {
        opcode: header.opcode,
        correlation_id: header.correlation_id,
        payload: Bytes::from(payload),
    })
}

/// Write a frame to a stream
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    writer.write_all(&frame.to_bytes())?;
    writer.flush()?;
    Ok(())
}
