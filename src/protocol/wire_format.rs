//! Wire format for the packet header.
//!
//! Each packet on the wire is:
//! ```text
//! ┌─────────┬─────────────┬──────────┐
//! │ Version │ Body length │ Body     │
//! │ 1 byte  │ 4 bytes, BE │ N bytes  │
//! └─────────┴─────────────┴──────────┘
//! ```
//!
//! The body is an opaque byte payload; this layer knows nothing about its
//! contents. A packet is only consumable once `HEADER_SIZE + body length`
//! bytes are buffered.

use bytes::{BufMut, Bytes, BytesMut};

/// Header size in bytes (fixed, exactly 5).
pub const HEADER_SIZE: usize = 5;

/// Protocol version written into every packet.
pub const PROTOCOL_VERSION: u8 = 0;

/// Encode a body into a complete packet: `version | u32-BE length | body`.
///
/// No length limit is enforced beyond the 32-bit field itself.
pub fn encode_packet(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    buf.freeze()
}

/// Decode the body length from a buffered header.
///
/// Returns `None` if fewer than [`HEADER_SIZE`] bytes are available.
pub fn decode_body_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_SIZE {
        return None;
    }
    Some(u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize)
}
