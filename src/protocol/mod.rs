//! Framing Protocol Implementation
//!
//! This module implements the sentinel-delimited wire protocol used between
//! clients and the server, and the state machines that reconstruct discrete
//! messages from each connection's raw byte stream.
//!
//! ## Overview
//!
//! Every application message travels inside one frame:
//!
//! ```text
//! [MARKER 0x01] [payload length, u32 BE] [BEGIN 0x02] [payload] [END 0x03]
//! ```
//!
//! Because TCP delivers a byte stream, frames arrive split, merged or
//! preceded by garbage. The decoder buffers partial data per connection,
//! emits each payload exactly once, and resynchronizes on the next marker
//! after corruption.
//!
//! ## Modules
//!
//! - `wire`: frame layout constants and the frame encoder
//! - `decoder`: the incremental per-connection state machine
//! - `assembler`: decoder lifecycle keyed by client address
//!
//! ## Example
//!
//! ```
//! use cachegate::protocol::{FrameDecoder, wire::encode_frame};
//!
//! let mut decoder = FrameDecoder::new();
//! decoder.feed(&encode_frame(b"GET weather"));
//! let payload = decoder.poll_frame().unwrap().unwrap();
//! assert_eq!(&payload[..], b"GET weather");
//! ```

pub mod assembler;
pub mod decoder;
pub mod wire;

// Re-export commonly used types for convenience
pub use assembler::{FrameAssembler, UnknownConnection};
pub use decoder::{FrameDecoder, FrameError};
pub use wire::encode_frame;
