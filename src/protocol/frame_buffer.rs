//! Packet framer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management. Incoming chunks
//! are appended to an internal buffer and every fully-buffered packet body
//! is sliced out in arrival order.
//!
//! The buffer is guarded by an internal lock: inbound bytes may be delivered
//! by a different worker than a concurrent [`reset`](PacketFramer::reset),
//! and callers must never observe interleaved buffer mutation.

use std::sync::{Mutex, MutexGuard};

use bytes::{Buf, Bytes, BytesMut};

use super::wire_format::{decode_body_len, HEADER_SIZE};

/// Stateful byte-stream reassembler.
///
/// Turns a raw chunk stream into discrete packet bodies. Knows nothing about
/// body semantics; bodies are opaque byte payloads.
pub struct PacketFramer {
    buffer: Mutex<BytesMut>,
}

impl PacketFramer {
    /// Create a new framer with an empty buffer.
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(BytesMut::with_capacity(64 * 1024)),
        }
    }

    /// Append a chunk and extract every fully-buffered packet body.
    ///
    /// Produces zero or more bodies per call, in arrival order. A chunk
    /// smaller than the header produces no output yet; a chunk spanning
    /// many packets produces many bodies in one call.
    pub fn ingest(&self, chunk: &[u8]) -> Vec<Bytes> {
        let mut buffer = self.lock();
        buffer.extend_from_slice(chunk);

        let mut bodies = Vec::new();
        while let Some(body) = take_packet(&mut buffer) {
            bodies.push(body);
        }
        bodies
    }

    /// Discard all currently buffered bytes.
    ///
    /// Used when a previously extracted body fails to decode: once framing
    /// desynchronizes, no later bytes in the same stream can be trusted, so
    /// the buffer is dropped in full rather than attempting a resync.
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Number of buffered bytes not yet forming a complete packet.
    pub fn buffered(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, BytesMut> {
        // A poisoning panic cannot leave the buffer mid-mutation here; keep
        // framing usable instead of propagating the poison.
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for PacketFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Slice one complete packet body out of the buffer, or return `None` when
/// fewer than `HEADER_SIZE + body length` bytes are available.
fn take_packet(buffer: &mut BytesMut) -> Option<Bytes> {
    let body_len = decode_body_len(buffer)?;
    if buffer.len() < HEADER_SIZE + body_len {
        return None;
    }

    buffer.advance(HEADER_SIZE);
    Some(buffer.split_to(body_len).freeze())
}
