//! Event Queues Between the Reactor and the Worker
//!
//! Four queues are the only channel between the reactor thread and the rest
//! of the system:
//!
//! - connected events (unbounded, low volume)
//! - disconnected events (unbounded, low volume)
//! - inbound messages (bounded, applies backpressure to the reactor)
//! - outbound messages (bounded, applies backpressure to reply producers)
//!
//! The bounded queues are drained with `try_recv` and filled with
//! `try_send`; a full queue is never allowed to block the reactor. Instead
//! the event is dropped, logged, and counted in [`ServerStats`], making
//! overload an observable degradation rather than a stall or a crash.
//!
//! Queueing a reply also wakes the reactor's poll so the write happens
//! immediately instead of after the next poll timeout.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use mio::Waker;
use tracing::{debug, warn};

/// Raw bytes read from one client, produced by the reactor and consumed
/// exactly once by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Remote address of the client the bytes came from.
    pub addr: SocketAddr,
    /// The bytes, in arrival order. Not necessarily a whole frame.
    pub bytes: Bytes,
}

/// Bytes to be written to one client, produced by application logic and
/// consumed exactly once by the reactor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Remote address of the client to write to.
    pub addr: SocketAddr,
    /// The bytes to write, delivered in full or not at all.
    pub bytes: Bytes,
}

/// Server-wide counters, shared across threads.
///
/// All counters use relaxed ordering; they feed logs and tests, not
/// synchronization.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Total number of connections accepted.
    pub connections_accepted: AtomicU64,
    /// Currently active connections.
    pub active_connections: AtomicU64,
    /// Inbound events handed to the worker queue.
    pub inbound_messages: AtomicU64,
    /// Inbound events dropped because the queue was full.
    pub inbound_dropped: AtomicU64,
    /// Outbound messages queued for the reactor.
    pub outbound_messages: AtomicU64,
    /// Outbound messages dropped because the queue was full.
    pub outbound_dropped: AtomicU64,
    /// Total bytes read from clients.
    pub bytes_read: AtomicU64,
    /// Total bytes written to clients.
    pub bytes_written: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn inbound_enqueued(&self) {
        self.inbound_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inbound_dropped(&self) {
        self.inbound_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn outbound_enqueued(&self) {
        self.outbound_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn outbound_dropped(&self) {
        self.outbound_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// The reactor's ends of the four queues.
#[derive(Debug)]
pub(crate) struct ReactorQueues {
    pub connected_tx: Sender<SocketAddr>,
    pub disconnected_tx: Sender<SocketAddr>,
    pub inbound_tx: Sender<InboundMessage>,
    pub outbound_rx: Receiver<OutboundMessage>,
}

/// The worker's ends of the consuming queues.
#[derive(Debug)]
pub(crate) struct WorkerQueues {
    pub connected_rx: Receiver<SocketAddr>,
    pub disconnected_rx: Receiver<SocketAddr>,
    pub inbound_rx: Receiver<InboundMessage>,
}

/// Creates the four queues. Message queues are bounded by `capacity`,
/// connect/disconnect queues are unbounded.
pub(crate) fn channels(
    capacity: usize,
) -> (ReactorQueues, WorkerQueues, Sender<OutboundMessage>) {
    let (connected_tx, connected_rx) = crossbeam_channel::unbounded();
    let (disconnected_tx, disconnected_rx) = crossbeam_channel::unbounded();
    let (inbound_tx, inbound_rx) = crossbeam_channel::bounded(capacity);
    let (outbound_tx, outbound_rx) = crossbeam_channel::bounded(capacity);

    (
        ReactorQueues {
            connected_tx,
            disconnected_tx,
            inbound_tx,
            outbound_rx,
        },
        WorkerQueues {
            connected_rx,
            disconnected_rx,
            inbound_rx,
        },
        outbound_tx,
    )
}

/// Handle for queueing bytes to be written to a client.
///
/// This is the boundary application logic uses to answer clients: it can be
/// cloned freely and used from any thread. Queueing wakes the reactor's
/// poll so replies do not wait out the poll timeout.
#[derive(Debug, Clone)]
pub struct ReplySender {
    tx: Sender<OutboundMessage>,
    waker: Arc<Waker>,
    stats: Arc<ServerStats>,
}

impl ReplySender {
    pub(crate) fn new(
        tx: Sender<OutboundMessage>,
        waker: Arc<Waker>,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self { tx, waker, stats }
    }

    /// Queues `bytes` to be written to `addr`.
    ///
    /// Returns false when the message was dropped: the outbound queue is
    /// full (counted in [`ServerStats::outbound_dropped`]) or the server
    /// has stopped.
    pub fn send(&self, addr: SocketAddr, bytes: Bytes) -> bool {
        match self.tx.try_send(OutboundMessage { addr, bytes }) {
            Ok(()) => {
                self.stats.outbound_enqueued();
                if let Err(e) = self.waker.wake() {
                    warn!(error = %e, "Failed to wake reactor for outbound message");
                }
                true
            }
            Err(TrySendError::Full(msg)) => {
                self.stats.outbound_dropped();
                warn!(client = %msg.addr, "Outbound queue full, dropping reply");
                false
            }
            Err(TrySendError::Disconnected(msg)) => {
                debug!(client = %msg.addr, "Server stopped, dropping reply");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_message_queues() {
        let (reactor, worker, outbound_tx) = channels(2);

        let addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let msg = InboundMessage {
            addr,
            bytes: Bytes::from_static(b"x"),
        };
        assert!(reactor.inbound_tx.try_send(msg.clone()).is_ok());
        assert!(reactor.inbound_tx.try_send(msg.clone()).is_ok());
        assert!(matches!(
            reactor.inbound_tx.try_send(msg.clone()),
            Err(TrySendError::Full(_))
        ));

        // Draining frees capacity again.
        assert_eq!(worker.inbound_rx.try_recv().unwrap(), msg);
        assert!(reactor.inbound_tx.try_send(msg).is_ok());

        let out = OutboundMessage {
            addr,
            bytes: Bytes::from_static(b"y"),
        };
        assert!(outbound_tx.try_send(out.clone()).is_ok());
        assert!(outbound_tx.try_send(out.clone()).is_ok());
        assert!(matches!(
            outbound_tx.try_send(out),
            Err(TrySendError::Full(_))
        ));
    }

    #[test]
    fn test_connect_events_are_unbounded() {
        let (reactor, worker, _outbound_tx) = channels(1);
        let addr: SocketAddr = "127.0.0.1:50001".parse().unwrap();
        for _ in 0..10_000 {
            reactor.connected_tx.send(addr).unwrap();
        }
        assert_eq!(worker.connected_rx.len(), 10_000);
    }

    #[test]
    fn test_stats_counters() {
        let stats = ServerStats::new();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();
        stats.bytes_read(10);
        stats.bytes_written(3);
        stats.inbound_dropped();

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 2);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_read.load(Ordering::Relaxed), 10);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 3);
        assert_eq!(stats.inbound_dropped.load(Ordering::Relaxed), 1);
    }
}
