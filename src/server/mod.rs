//! Server Front-End
//!
//! This module wires the two long-lived threads together:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            ServerHandle                             │
//! │                                                                     │
//! │  ┌───────────────┐   connect/disconnect    ┌───────────────────┐    │
//! │  │ Reactor thread│ ──────────────────────> │   Worker thread   │    │
//! │  │               │   inbound (bounded)     │                   │    │
//! │  │  mio Poll     │ ──────────────────────> │  FrameAssembler   │    │
//! │  │  all sockets  │                         │  CommandDispatcher│    │
//! │  │  registry     │ <────────────────────── │                   │    │
//! │  └───────────────┘   outbound (bounded)    └───────────────────┘    │
//! │          ▲                                                          │
//! │          └── waker: stop() and queued replies interrupt the poll    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The reactor owns every socket, the worker owns every decoder; the four
//! queues are the only way data crosses between them. `stop()` flips one
//! shared flag, wakes the poll, and joins both threads; it may be called
//! from any thread and is idempotent.

pub mod queues;
pub mod reactor;
pub mod worker;

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use mio::Waker;
use thiserror::Error;
use tracing::info;

use crate::commands::CommandDispatcher;
use crate::protocol::wire::DEFAULT_MAX_PAYLOAD;
use crate::protocol::FrameAssembler;
use crate::server::reactor::Reactor;
use crate::server::worker::Worker;

pub use queues::{InboundMessage, OutboundMessage, ReplySender, ServerStats};

/// Errors raised while starting the server. All of them happen before any
/// thread is spawned or any client is accepted.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured host/port pair does not parse as a socket address.
    #[error("invalid listen address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// Binding the listener or creating the poll failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Tunables supplied before the server starts.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on; 0 picks an ephemeral port.
    pub port: u16,
    /// Upper bound on one poll wait; a stop request is observed within
    /// this interval even with no traffic.
    pub poll_timeout: Duration,
    /// Capacity of the bounded inbound and outbound message queues.
    pub queue_capacity: usize,
    /// Authoritative maximum message size: the largest frame payload the
    /// decoder accepts and the reactor's per-event read flush threshold.
    pub max_payload: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            poll_timeout: Duration::from_millis(100),
            queue_capacity: 1000,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A running server: two named threads plus the shared state needed to
/// observe and stop them.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stats: Arc<ServerStats>,
    replies: ReplySender,
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
    reactor_thread: Option<thread::JoinHandle<()>>,
    worker_thread: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Binds the listener and starts the reactor and worker threads.
    ///
    /// The dispatcher handles every decoded message; pass
    /// [`CommandDispatcher::new`] for the default all-unknown table.
    pub fn spawn(
        config: ServerConfig,
        dispatcher: CommandDispatcher,
    ) -> Result<Self, ServerError> {
        let stats = Arc::new(ServerStats::new());
        let running = Arc::new(AtomicBool::new(true));
        let (reactor_queues, worker_queues, outbound_tx) =
            queues::channels(config.queue_capacity);

        let (reactor, waker) =
            Reactor::new(&config, reactor_queues, stats.clone(), running.clone())?;
        let local_addr = reactor.local_addr();
        let replies = ReplySender::new(outbound_tx, waker.clone(), stats.clone());

        let assembler = FrameAssembler::new(config.max_payload);
        let worker = Worker::new(
            worker_queues,
            replies.clone(),
            assembler,
            dispatcher,
            running.clone(),
        );

        let reactor_thread = thread::Builder::new()
            .name("cachegate-io".to_string())
            .spawn(move || reactor.run())?;
        let worker_thread = thread::Builder::new()
            .name("cachegate-worker".to_string())
            .spawn(move || worker.run())?;

        info!(addr = %local_addr, "Server started");
        Ok(Self {
            local_addr,
            stats,
            replies,
            running,
            waker,
            reactor_thread: Some(reactor_thread),
            worker_thread: Some(worker_thread),
        })
    }

    /// The address the listener bound (resolves port 0 requests).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared server counters.
    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// A cloneable handle for queueing raw bytes to a client, the boundary
    /// external reply producers use.
    pub fn replies(&self) -> ReplySender {
        self.replies.clone()
    }

    /// Queues `bytes` to be written to `addr`. See [`ReplySender::send`].
    pub fn send(&self, addr: SocketAddr, bytes: Bytes) -> bool {
        self.replies.send(addr, bytes)
    }

    /// Stops both loops and waits for them to finish. Safe to call from
    /// any thread, any number of times; the reactor observes the request
    /// within one poll timeout.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.waker.wake();
        if let Some(handle) = self.reactor_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.worker_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
