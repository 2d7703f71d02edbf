//! Frame definitions
//!
//! A frame is a single protocol message on the wire. The decoder is
//! resumable: bytes can be fed in arbitrary chunks and complete frames are
//! handed out as soon as they are buffered.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CacheError, Result};

/// Correlation identifier linking a request to its response
pub type CorrelationId = u64;

/// Correlation id used for the connection handshake; never allocated to a request
pub const HANDSHAKE_ID: CorrelationId = 0;

/// Header size: opcode (1) + correlation id (8) + payload len (4) + crc (4)
pub const HEADER_SIZE: usize = 17;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Frame opcodes
///
/// Requests live below 0x80, responses at 0x80 and above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Auth = 0x01,
    Get = 0x02,
    Set = 0x03,

    AuthOk = 0x80,
    AuthRejected = 0x81,
    Hit = 0x82,
    Miss = 0x83,
    Success = 0x84,
    Error = 0x85,
}

impl Opcode {
    /// True for opcodes sent by the service
    pub fn is_response(self) -> bool {
        (self as u8) & 0x80 != 0
    }

    /// Parse an opcode byte
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(Opcode::Auth),
            0x02 => Ok(Opcode::Get),
            0x03 => Ok(Opcode::Set),
            0x80 => Ok(Opcode::AuthOk),
            0x81 => Ok(Opcode::AuthRejected),
            0x82 => Ok(Opcode::Hit),
            0x83 => Ok(Opcode::Miss),
            0x84 => Ok(Opcode::Success),
            0x85 => Ok(Opcode::Error),
            _ => Err(CacheError::Protocol(format!(
                "Unknown opcode: 0x{:02x}",
                byte
            ))),
        }
    }
}

/// A single decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub correlation_id: CorrelationId,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: Opcode, correlation_id: CorrelationId, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            correlation_id,
            payload: payload.into(),
        }
    }

    /// Frame with no payload
    pub fn empty(opcode: Opcode, correlation_id: CorrelationId) -> Self {
        Self::new(opcode, correlation_id, Bytes::new())
    }

    /// Total size on the wire
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Append the wire form of this frame to `dst`
    ///
    /// Format: opcode (1) + correlation id (8) + payload_len (4) + crc (4) + payload
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(self.opcode as u8);
        dst.put_u64(self.correlation_id);
        dst.put_u32(self.payload.len() as u32);
        dst.put_u32(crc32fast::hash(&self.payload));
        dst.extend_from_slice(&self.payload);
    }

    /// Wire form of this frame
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }
}

/// Parsed fixed-size header
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub opcode: Opcode,
    pub correlation_id: CorrelationId,
    pub payload_len: usize,
    pub crc: u32,
}

impl FrameHeader {
    /// Parse a header; `bytes` must hold at least HEADER_SIZE bytes
    pub(crate) fn parse(mut bytes: &[u8]) -> Result<Self> {
        let opcode = Opcode::from_byte(bytes.get_u8())?;
        let correlation_id = bytes.get_u64();
        let payload_len = bytes.get_u32();
        let crc = bytes.get_u32();

        // Validate payload length
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(CacheError::Protocol(format!(
                "Payload too large: {} bytes (max {})",
                payload_len, MAX_PAYLOAD_SIZE
            )));
        }

        Ok(Self {
            opcode,
            correlation_id,
            payload_len: payload_len as usize,
            crc,
        })
    }

    pub(crate) fn verify(&self, payload: &[u8]) -> Result<()> {
        let actual = crc32fast::hash(payload);
        if actual != self.crc {
            return Err(CacheError::Protocol(format!(
                "Checksum mismatch on frame {}: expected {:08x}, got {:08x}",
                self.correlation_id, self.crc, actual
            )));
        }
        Ok(())
    }
}

/// Streaming frame decoder
///
/// Buffers partial reads until a whole frame is available. After an error
/// the buffered state is undefined and the owning connection must be dropped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Feed bytes read from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Take the next complete frame
    ///
    /// Returns `Ok(None)` when the buffer holds only part of a frame.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = FrameHeader::parse(&self.buffer[..HEADER_SIZE])?;
        let total_len = HEADER_SIZE + header.payload_len;
        if self.buffer.len() < total_len {
            self.buffer.reserve(total_len - self.buffer.len());
            return Ok(None);
        }

        let mut raw = self.buffer.split_to(total_len);
        let payload = raw.split_off(HEADER_SIZE).freeze();
        header.verify(&payload)?;

        Ok(Some(Frame {
            opcode: header.opcode,
            correlation_id: header.correlation_id,
            payload,
        }))
    }
}
