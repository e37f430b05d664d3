//! # cachegate - Reactor-Based TCP Front-End for a Key-Value Cache
//!
//! cachegate accepts many concurrent client connections, reconstructs a
//! sentinel-delimited framing protocol from each connection's raw byte
//! stream, and hands decoded messages to a worker for command dispatch.
//! It demonstrates systems programming concepts like non-blocking I/O
//! multiplexing, incremental protocol parsing, and lock-free cross-thread
//! message passing.
//!
//! ## Features
//!
//! - **Single-Threaded Reactor**: one mio poll multiplexes every socket;
//!   no connection can block another
//! - **Resilient Framing**: partial reads, batched frames and corrupt
//!   streams all decode correctly, with resynchronization on the marker
//! - **Bounded Backpressure**: the reactor and worker exchange data only
//!   through bounded queues; overload degrades observably instead of
//!   stalling the I/O loop
//! - **Pluggable Dispatch**: command handling is a name-to-handler map
//!   behind a narrow boundary, ready for a storage engine
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                               cachegate                                │
//! │                                                                        │
//! │  ┌──────────────┐  connected / disconnected / inbound  ┌────────────┐  │
//! │  │   Reactor    │ ────────────────────────────────────>│   Worker   │  │
//! │  │   thread     │                                      │   thread   │  │
//! │  │              │ <──────────────────────────────────  │            │  │
//! │  │  mio Poll    │              outbound                │ Framing    │  │
//! │  │  listener    │                                      │ state per  │  │
//! │  │  registry    │                                      │ connection │  │
//! │  │  sockets     │                                      │            │  │
//! │  └──────┬───────┘                                      └─────┬──────┘  │
//! │         │                                                    │         │
//! │         ▼                                                    ▼         │
//! │  ┌──────────────┐                                    ┌──────────────┐  │
//! │  │ TCP clients  │                                    │  Command     │  │
//! │  │ (framed byte │                                    │  dispatcher  │  │
//! │  │  streams)    │                                    │  (boundary)  │  │
//! │  └──────────────┘                                    └──────────────┘  │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use cachegate::commands::CommandDispatcher;
//! use cachegate::server::{ServerConfig, ServerHandle};
//!
//! fn main() -> Result<(), cachegate::server::ServerError> {
//!     let config = ServerConfig::default();
//!     let mut handle = ServerHandle::spawn(config, CommandDispatcher::new())?;
//!     println!("listening on {}", handle.local_addr());
//!     // ... run until a shutdown signal ...
//!     handle.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Wire Protocol
//!
//! Every message travels in one frame:
//!
//! ```text
//! [MARKER 0x01] [payload length, u32 big-endian] [BEGIN 0x02] [payload] [END 0x03]
//! ```
//!
//! See [`protocol::wire`] for the layout constants and [`protocol::decoder`]
//! for how a corrupted stream regains alignment.
//!
//! ## Module Overview
//!
//! - [`protocol`]: wire format, frame decoder and per-connection state
//! - [`server`]: reactor loop, event queues and worker loop
//! - [`commands`]: command dispatch boundary
//!
//! ## Design Highlights
//!
//! ### Ownership Instead of Locks
//!
//! The reactor thread owns every socket and the connection registry; the
//! worker thread owns every framing state machine. Nothing on the message
//! path takes a lock; the bounded queues are the only shared structure.
//!
//! ### Observable Degradation
//!
//! A full queue never blocks the reactor. The event is dropped, logged and
//! counted in [`server::ServerStats`], so overload shows up in metrics
//! rather than as a mysterious stall.

pub mod commands;
pub mod protocol;
pub mod server;

// Re-export commonly used types for convenience
pub use commands::{CommandDispatcher, CommandHandler};
pub use protocol::{FrameAssembler, FrameDecoder, FrameError};
pub use server::{ReplySender, ServerConfig, ServerError, ServerHandle, ServerStats};

/// The default port cachegate listens on
pub const DEFAULT_PORT: u16 = 7171;

/// The default host cachegate binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of cachegate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
