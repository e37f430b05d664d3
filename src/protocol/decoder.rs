//! Incremental Frame Decoder
//!
//! This module implements the per-connection framing state machine. TCP is a
//! stream protocol, so a frame may arrive split across any number of reads,
//! and one read may carry several complete frames plus the start of the next.
//! The decoder buffers partial data between calls and hands back complete
//! payloads as soon as they can be extracted.
//!
//! ## How the Decoder Works
//!
//! The caller appends raw socket bytes with [`FrameDecoder::feed`] and then
//! drains complete frames with [`FrameDecoder::poll_frame`]:
//!
//! - `Ok(Some(payload))` - a complete frame was decoded
//! - `Ok(None)` - the buffered data does not contain a complete frame yet
//! - `Err(FrameError)` - the frame was malformed; it has been dropped and the
//!   state machine is ready for the next frame (the connection stays usable)
//!
//! ## Phases
//!
//! ```text
//!  SeekMarker ──marker──> ReadLength ──4 bytes──> SeekBegin ──0x02──> ReadPayload
//!      ▲                      │                       │                   │
//!      │                oversized length         wrong sentinel     END checked,
//!      └──────────────────────┴───────────────────────┴────────── payload emitted
//! ```
//!
//! The expected payload length only exists while the decoder is between the
//! length field and the END sentinel, so it lives inside the `SeekBegin` and
//! `ReadPayload` variants rather than in a separate field.
//!
//! Bytes seen before a marker are discarded; this is how the decoder regains
//! frame alignment after corruption. A frame with a bad END sentinel is
//! consumed exactly, and the bytes after it are rescanned for the next
//! marker, so one bad frame never poisons the frames queued behind it.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

use crate::protocol::wire::{
    BEGIN, BEGIN_OFFSET, DEFAULT_MAX_PAYLOAD, END, LENGTH_OFFSET, MARKER, PAYLOAD_OFFSET,
};

/// Errors produced while decoding a frame.
///
/// Every variant is recoverable: the decoder has already dropped the
/// offending bytes and reset itself when one of these is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The length field declared more payload bytes than the configured
    /// maximum. The whole accumulator is discarded because the frame's true
    /// extent cannot be trusted.
    #[error("declared payload length {declared} exceeds maximum {max}")]
    Oversized { declared: usize, max: usize },

    /// The byte where the BEGIN sentinel belongs held something else.
    #[error("expected BEGIN sentinel, found {found:#04x}")]
    BadBegin { found: u8 },

    /// The byte after the payload was not the END sentinel.
    #[error("expected END sentinel, found {found:#04x}")]
    BadEnd { found: u8 },
}

/// Decoding phase, advanced as bytes become available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Scanning for the frame marker; everything before it is garbage.
    SeekMarker,
    /// Marker seen, waiting for the 4-byte length field.
    ReadLength,
    /// Length decoded, waiting for the BEGIN sentinel.
    SeekBegin { len: usize },
    /// Waiting for `len` payload bytes plus the END sentinel.
    ReadPayload { len: usize },
}

/// Per-connection framing state machine.
///
/// One instance exists per live connection, created on connect and dropped
/// on disconnect. The accumulator never retains more than one maximum-size
/// frame across calls: garbage is discarded while seeking the marker, and a
/// declared length above `max_payload` is rejected before its payload is
/// ever buffered.
///
/// # Example
///
/// ```
/// use cachegate::protocol::{FrameDecoder, wire::encode_frame};
///
/// let mut decoder = FrameDecoder::new();
/// decoder.feed(&encode_frame(b"PING"));
/// let payload = decoder.poll_frame().unwrap().unwrap();
/// assert_eq!(&payload[..], b"PING");
/// assert!(decoder.poll_frame().unwrap().is_none());
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    /// Bytes accumulated across reads, aligned so a frame starts at index 0
    /// except while seeking a marker.
    buf: BytesMut,
    phase: Phase,
    max_payload: usize,
}

impl FrameDecoder {
    /// Creates a decoder with the default maximum payload size.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Creates a decoder that rejects frames declaring more than
    /// `max_payload` payload bytes.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            phase: Phase::SeekMarker,
            max_payload,
        }
    }

    /// Appends raw bytes from the connection.
    ///
    /// While the decoder is idle between frames, leading garbage is dropped
    /// immediately rather than buffered, so a sender that never produces a
    /// marker costs no memory.
    pub fn feed(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        if self.phase == Phase::SeekMarker && self.buf.is_empty() {
            if let Some(idx) = find_marker(chunk) {
                self.buf.extend_from_slice(&chunk[idx..]);
                self.phase = Phase::ReadLength;
            }
        } else {
            self.buf.extend_from_slice(chunk);
        }
    }

    /// Attempts to extract the next complete frame from the buffered bytes.
    ///
    /// Call repeatedly after [`feed`](Self::feed) until it returns
    /// `Ok(None)`; a single read can carry any number of frames.
    pub fn poll_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        loop {
            match self.phase {
                Phase::SeekMarker => match find_marker(&self.buf) {
                    Some(idx) => {
                        self.buf.advance(idx);
                        self.phase = Phase::ReadLength;
                    }
                    None => {
                        self.buf.clear();
                        return Ok(None);
                    }
                },
                Phase::ReadLength => {
                    if self.buf.len() < LENGTH_OFFSET + 4 {
                        return Ok(None);
                    }
                    let declared = u32::from_be_bytes([
                        self.buf[LENGTH_OFFSET],
                        self.buf[LENGTH_OFFSET + 1],
                        self.buf[LENGTH_OFFSET + 2],
                        self.buf[LENGTH_OFFSET + 3],
                    ]) as usize;
                    if declared > self.max_payload {
                        self.reset();
                        return Err(FrameError::Oversized {
                            declared,
                            max: self.max_payload,
                        });
                    }
                    self.phase = Phase::SeekBegin { len: declared };
                }
                Phase::SeekBegin { len } => {
                    if self.buf.len() <= BEGIN_OFFSET {
                        return Ok(None);
                    }
                    let found = self.buf[BEGIN_OFFSET];
                    if found != BEGIN {
                        self.reset();
                        return Err(FrameError::BadBegin { found });
                    }
                    self.phase = Phase::ReadPayload { len };
                }
                Phase::ReadPayload { len } => {
                    let frame_len = PAYLOAD_OFFSET + len + 1;
                    if self.buf.len() < frame_len {
                        return Ok(None);
                    }
                    let found = self.buf[frame_len - 1];
                    self.phase = Phase::SeekMarker;
                    if found != END {
                        // Drop exactly this frame; whatever follows gets
                        // rescanned for the next marker.
                        self.buf.advance(frame_len);
                        return Err(FrameError::BadEnd { found });
                    }
                    let frame = self.buf.split_to(frame_len).freeze();
                    return Ok(Some(frame.slice(PAYLOAD_OFFSET..frame_len - 1)));
                }
            }
        }
    }

    /// Number of bytes currently buffered for an incomplete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.phase = Phase::SeekMarker;
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == MARKER)
}
