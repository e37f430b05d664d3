//! Wire Format Definition
//!
//! This module defines the framing format used on the wire between clients
//! and the server. Every application message travels inside one frame:
//!
//! ```text
//! ┌────────┬───────────────────┬────────┬──────────────┬────────┐
//! │ MARKER │ length (u32, BE)  │ BEGIN  │   payload    │  END   │
//! │  0x01  │     4 bytes       │  0x02  │ length bytes │  0x03  │
//! └────────┴───────────────────┴────────┴──────────────┴────────┘
//! offset 0  offset 1..5         offset 5  offset 6..6+N  offset 6+N
//! ```
//!
//! The sentinels are the ASCII control bytes SOH, STX and ETX. The length
//! field counts payload bytes only; it never includes the sentinels or
//! itself. A frame therefore occupies `payload.len() + FRAME_OVERHEAD`
//! bytes on the wire.
//!
//! The decoder treats the marker as a resynchronization point: bytes that
//! arrive outside a frame are discarded until the next marker is seen.

use bytes::{BufMut, Bytes, BytesMut};

/// Marks the start of a frame (ASCII SOH).
pub const MARKER: u8 = 0x01;

/// Precedes the payload bytes (ASCII STX).
pub const BEGIN: u8 = 0x02;

/// Follows the payload bytes (ASCII ETX).
pub const END: u8 = 0x03;

/// Byte offset of the big-endian payload length within a frame.
pub const LENGTH_OFFSET: usize = 1;

/// Byte offset of the BEGIN sentinel within a frame.
pub const BEGIN_OFFSET: usize = 5;

/// Byte offset of the first payload byte within a frame.
pub const PAYLOAD_OFFSET: usize = 6;

/// Non-payload bytes in every frame: marker, length, begin and end.
pub const FRAME_OVERHEAD: usize = PAYLOAD_OFFSET + 1;

/// Default maximum payload size (100 KB).
///
/// One limit governs everything: the largest declared frame length the
/// decoder accepts, the decoder's accumulator bound, and the reactor's
/// per-event read flush size. It is configurable through
/// [`ServerConfig::max_payload`](crate::server::ServerConfig).
pub const DEFAULT_MAX_PAYLOAD: usize = 100 * 1024;

/// Encodes a payload into a complete wire frame.
///
/// # Example
///
/// ```
/// use cachegate::protocol::wire::{encode_frame, FRAME_OVERHEAD};
///
/// let frame = encode_frame(b"ABC");
/// assert_eq!(frame.len(), 3 + FRAME_OVERHEAD);
/// assert_eq!(&frame[..], &[0x01, 0, 0, 0, 3, 0x02, b'A', b'B', b'C', 0x03]);
/// ```
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.put_u8(MARKER);
    frame.put_u32(payload.len() as u32);
    frame.put_u8(BEGIN);
    frame.put_slice(payload);
    frame.put_u8(END);
    frame.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_empty_payload() {
        let frame = encode_frame(b"");
        assert_eq!(&frame[..], &[MARKER, 0, 0, 0, 0, BEGIN, END]);
    }

    #[test]
    fn test_encode_layout() {
        let frame = encode_frame(b"hello");
        assert_eq!(frame[0], MARKER);
        assert_eq!(&frame[LENGTH_OFFSET..BEGIN_OFFSET], &[0, 0, 0, 5]);
        assert_eq!(frame[BEGIN_OFFSET], BEGIN);
        assert_eq!(&frame[PAYLOAD_OFFSET..PAYLOAD_OFFSET + 5], b"hello");
        assert_eq!(frame[PAYLOAD_OFFSET + 5], END);
    }

    #[test]
    fn test_overhead_is_constant() {
        for len in [0usize, 1, 100] {
            let frame = encode_frame(&vec![0xAA; len]);
            assert_eq!(frame.len(), len + FRAME_OVERHEAD);
        }
    }
}
