//! Command Dispatch Boundary
//!
//! This module is the seam between the connection front-end and whatever
//! storage engine eventually executes cache commands. The front-end hands
//! it `(client address, decoded payload)`; it answers with reply bytes to
//! be framed and queued for that client.
//!
//! ```text
//! Decoded message
//!       │
//!       ▼
//! ┌──────────────────┐
//! │ CommandDispatcher│   name ──> handler fn
//! │                  │   no match ──> unknown-command reply
//! └────────┬─────────┘
//!          │
//!          ▼
//!    Reply payload
//! ```
//!
//! Dispatch is a plain map from command name to handler function with an
//! explicit default: any name without a handler (and any payload that is
//! not even a command) gets the unknown-command reply. The table ships
//! empty, so in this revision every command - including the reserved
//! PUT/GET/REMOVE/KEYS/PING names - answers `unknown command`; wiring real
//! handlers is the storage engine's job.
//!
//! No payload may crash the dispatcher: binary garbage and empty messages
//! take the default path like everything else.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use tracing::debug;

/// Reserved command names understood by the protocol.
pub mod names {
    pub const PUT: &str = "PUT";
    pub const GET: &str = "GET";
    pub const REMOVE: &str = "REMOVE";
    pub const KEYS: &str = "KEYS";
    pub const PING: &str = "PING";
}

/// The reply sent for any command without a registered handler.
pub const UNKNOWN_COMMAND: &[u8] = b"unknown command";

/// A command handler: receives the whitespace-split arguments after the
/// command name, returns the reply payload.
pub type CommandHandler = fn(args: &[&str]) -> Bytes;

/// Maps command names to handler functions, with an explicit default for
/// everything else.
#[derive(Debug, Default)]
pub struct CommandDispatcher {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandDispatcher {
    /// Creates a dispatcher with an empty table: every command answers
    /// with the unknown-command reply until handlers are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a command name. Names are matched
    /// case-insensitively.
    pub fn register(&mut self, name: &str, handler: CommandHandler) {
        self.handlers.insert(name.to_ascii_uppercase(), handler);
    }

    /// Dispatches one decoded message and returns the reply payload.
    ///
    /// The first whitespace-separated token names the command, the rest
    /// are its arguments. Payloads that are not valid UTF-8, are empty, or
    /// name an unregistered command all get the default reply.
    pub fn dispatch(&self, addr: SocketAddr, payload: &[u8]) -> Bytes {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text,
            Err(_) => {
                debug!(client = %addr, "Non-text payload");
                return Bytes::from_static(UNKNOWN_COMMAND);
            }
        };

        let mut parts = tokenize(text);
        let name = match parts.first() {
            Some(name) => name.to_ascii_uppercase(),
            None => {
                debug!(client = %addr, "Empty payload");
                return Bytes::from_static(UNKNOWN_COMMAND);
            }
        };

        match self.handlers.get(&name) {
            Some(handler) => handler(&parts.split_off(1)),
            None => {
                debug!(client = %addr, command = %name, "Unknown command");
                Bytes::from_static(UNKNOWN_COMMAND)
            }
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn tokenize(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}
