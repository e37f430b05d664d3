//! Per-Connection Framing State
//!
//! The worker thread owns one [`FrameDecoder`] per live connection, keyed by
//! the client's remote address. This module ties decoder lifecycle to the
//! connection lifecycle:
//!
//! - connect registers a fresh decoder (a reconnect from the same address
//!   starts clean, with no leftover partial data)
//! - inbound bytes run through that connection's decoder
//! - disconnect releases the decoder and any buffered partial frame
//!
//! All state here lives on a single thread, so plain maps suffice; the
//! reactor never touches framing state.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use thiserror::Error;
use tracing::warn;

use crate::protocol::decoder::FrameDecoder;

/// Bytes arrived for an address that was never registered, or whose state
/// was already released by a disconnect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no framing state for client {0}")]
pub struct UnknownConnection(pub SocketAddr);

/// Registry of framing state machines, one per connected client.
#[derive(Debug)]
pub struct FrameAssembler {
    streams: HashMap<SocketAddr, FrameDecoder>,
    max_payload: usize,
}

impl FrameAssembler {
    /// Creates an empty registry whose decoders reject payloads larger than
    /// `max_payload`.
    pub fn new(max_payload: usize) -> Self {
        Self {
            streams: HashMap::new(),
            max_payload,
        }
    }

    /// Registers fresh framing state for a newly connected client,
    /// replacing any stale state left by an earlier connection from the
    /// same address.
    pub fn on_connect(&mut self, addr: SocketAddr) {
        self.streams
            .insert(addr, FrameDecoder::with_max_payload(self.max_payload));
    }

    /// Runs the client's state machine over newly arrived bytes and returns
    /// every message completed by this call, in arrival order.
    ///
    /// Malformed frames are logged and dropped without failing the call;
    /// the decoder has already resynchronized past them.
    pub fn on_bytes(
        &mut self,
        addr: SocketAddr,
        bytes: &[u8],
    ) -> Result<Vec<Bytes>, UnknownConnection> {
        let decoder = self
            .streams
            .get_mut(&addr)
            .ok_or(UnknownConnection(addr))?;

        decoder.feed(bytes);
        let mut messages = Vec::new();
        loop {
            match decoder.poll_frame() {
                Ok(Some(payload)) => messages.push(payload),
                Ok(None) => break,
                Err(e) => warn!(client = %addr, error = %e, "Dropping malformed frame"),
            }
        }
        Ok(messages)
    }

    /// Releases the client's framing state.
    pub fn on_disconnect(&mut self, addr: SocketAddr) {
        self.streams.remove(&addr);
    }

    /// Number of clients with registered framing state.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Returns true when no client is registered.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
