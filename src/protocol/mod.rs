//! Protocol module - wire framing for the byte stream.
//!
//! This module turns a raw chunk stream into discrete packet bodies and
//! back:
//! - 5-byte header encoding/decoding
//! - Packet framer for accumulating partial reads

mod frame_buffer;
mod wire_format;

pub use frame_buffer::PacketFramer;
pub use wire_format::{decode_body_len, encode_packet, HEADER_SIZE, PROTOCOL_VERSION};
