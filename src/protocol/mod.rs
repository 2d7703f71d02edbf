//! Protocol Module
//!
//! Defines the wire protocol between the client and the cache service.
//!
//! ## Protocol Format (V1 - Correlated Binary)
//!
//! ### Frame Format
//! ```text
//! ┌──────────┬───────────────────┬──────────┬──────────┬─────────────┐
//! │ Op (1)   │ Correlation (8)   │ Len (4)  │ CRC (4)  │   Payload   │
//! └──────────┴───────────────────┴──────────┴──────────┴─────────────┘
//! ```
//!
//! Every request carries a correlation id; the service echoes it on the
//! response so many requests can be in flight on one connection and be
//! answered in any order. Id 0 is reserved for the handshake.
//!
//! ### Requests
//! - 0x01: AUTH - Payload: bearer token
//! - 0x02: GET  - Payload: cache + key
//! - 0x03: SET  - Payload: cache + key + ttl + value
//!
//! ### Responses
//! - 0x80: AUTH_OK
//! - 0x81: AUTH_REJECTED - Payload: reason
//! - 0x82: HIT           - Payload: value
//! - 0x83: MISS
//! - 0x84: SUCCESS
//! - 0x85: ERROR         - Payload: message

mod codec;
mod frame;
mod request;
mod response;

pub use codec::{
    decode_auth, decode_auth_reply, decode_request, decode_response, encode_auth,
    encode_auth_reply, encode_request, encode_response, read_frame, write_frame,
};
pub use frame::{
    CorrelationId, Frame, FrameDecoder, Opcode, HANDSHAKE_ID, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
pub use request::{Request, RequestKind};
pub use response::{Response, ResponseKind};
