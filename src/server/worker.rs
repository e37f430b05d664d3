//! Worker Loop
//!
//! A single dedicated thread drains the event queues the reactor fills. It
//! owns all framing state and the command dispatcher; the reactor owns the
//! sockets. Neither thread ever touches the other's state, so no locks
//! exist anywhere on the message path.
//!
//! Each iteration handles at most one connect event, one disconnect event
//! and one inbound message, in that fixed order. Connect events are always
//! emitted before any bytes for the same client and both queues are FIFO,
//! so framing state exists by the time the first bytes arrive. A
//! disconnect can overtake bytes still sitting in the inbound queue; those
//! late bytes are logged and dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::commands::CommandDispatcher;
use crate::protocol::{encode_frame, FrameAssembler};
use crate::server::queues::{InboundMessage, ReplySender, WorkerQueues};

/// How long the worker sleeps when every queue was empty.
const IDLE_WAIT: Duration = Duration::from_millis(1);

/// The worker loop. Owns the per-connection framing state and the command
/// dispatcher.
pub(crate) struct Worker {
    queues: WorkerQueues,
    replies: ReplySender,
    assembler: FrameAssembler,
    dispatcher: CommandDispatcher,
    running: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        queues: WorkerQueues,
        replies: ReplySender,
        assembler: FrameAssembler,
        dispatcher: CommandDispatcher,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            queues,
            replies,
            assembler,
            dispatcher,
            running,
        }
    }

    /// Runs until the stop flag is observed, idling briefly whenever all
    /// queues are empty.
    pub fn run(mut self) {
        info!("Worker started");
        while self.running.load(Ordering::Relaxed) {
            if !self.tick() {
                thread::sleep(IDLE_WAIT);
            }
        }
        info!(clients = self.assembler.len(), "Worker stopped");
    }

    /// One iteration: at most one event from each queue, in fixed order.
    /// Returns whether any queue had work.
    pub fn tick(&mut self) -> bool {
        let mut busy = false;

        if let Ok(addr) = self.queues.connected_rx.try_recv() {
            busy = true;
            self.assembler.on_connect(addr);
            info!(client = %addr, "Session opened");
        }

        if let Ok(addr) = self.queues.disconnected_rx.try_recv() {
            busy = true;
            self.assembler.on_disconnect(addr);
            info!(client = %addr, "Session closed");
        }

        if let Ok(msg) = self.queues.inbound_rx.try_recv() {
            busy = true;
            self.handle_inbound(msg);
        }

        busy
    }

    fn handle_inbound(&mut self, msg: InboundMessage) {
        let messages = match self.assembler.on_bytes(msg.addr, &msg.bytes) {
            Ok(messages) => messages,
            Err(e) => {
                // Bytes can arrive after the session was torn down.
                warn!(error = %e, bytes = msg.bytes.len(), "Dropping bytes");
                return;
            }
        };

        for payload in messages {
            debug!(client = %msg.addr, bytes = payload.len(), "Decoded message");
            let reply = self.dispatcher.dispatch(msg.addr, &payload);
            self.replies.send(msg.addr, encode_frame(&reply));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire::DEFAULT_MAX_PAYLOAD;
    use crate::server::queues::{self, OutboundMessage, ReactorQueues, ServerStats};
    use bytes::Bytes;
    use crossbeam_channel::Receiver;
    use mio::{Poll, Token, Waker};
    use std::net::SocketAddr;

    /// Builds a worker wired to queues the test drives directly, stepping
    /// it with `tick` instead of a thread.
    fn harness() -> (Worker, ReactorQueues, Receiver<OutboundMessage>) {
        let (reactor_queues, worker_queues, outbound_tx) = queues::channels(16);
        let outbound_rx = reactor_queues.outbound_rx.clone();

        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(1)).unwrap());
        let stats = Arc::new(ServerStats::new());
        let replies = ReplySender::new(outbound_tx, waker, stats);

        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register("PING", |_args| Bytes::from_static(b"PONG"));

        let worker = Worker::new(
            worker_queues,
            replies,
            FrameAssembler::new(DEFAULT_MAX_PAYLOAD),
            dispatcher,
            Arc::new(AtomicBool::new(true)),
        );
        (worker, reactor_queues, outbound_rx)
    }

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn test_idle_tick_reports_no_work() {
        let (mut worker, _queues, _outbound) = harness();
        assert!(!worker.tick());
    }

    #[test]
    fn test_connect_before_bytes_in_same_iteration_batch() {
        let (mut worker, queues, outbound) = harness();
        let client = addr(41001);

        // Reactor emits the connect event strictly before the first read.
        queues.connected_tx.send(client).unwrap();
        queues
            .inbound_tx
            .send(InboundMessage {
                addr: client,
                bytes: encode_frame(b"PING"),
            })
            .unwrap();

        assert!(worker.tick());
        let reply = outbound.try_recv().unwrap();
        assert_eq!(reply.addr, client);

        // The reply travels as a complete frame.
        let mut decoder = crate::protocol::FrameDecoder::new();
        decoder.feed(&reply.bytes);
        let payload = decoder.poll_frame().unwrap().unwrap();
        assert_eq!(&payload[..], b"PONG");
    }

    #[test]
    fn test_frame_split_across_inbound_events() {
        let (mut worker, queues, outbound) = harness();
        let client = addr(41002);
        let frame = encode_frame(b"PING extra");

        queues.connected_tx.send(client).unwrap();
        for chunk in frame.chunks(3) {
            queues
                .inbound_tx
                .send(InboundMessage {
                    addr: client,
                    bytes: Bytes::copy_from_slice(chunk),
                })
                .unwrap();
        }

        while worker.tick() {}
        let reply = outbound.try_recv().unwrap();
        assert_eq!(reply.addr, client);
        assert!(outbound.try_recv().is_err());
    }

    #[test]
    fn test_unknown_command_gets_the_default_reply() {
        let (mut worker, queues, outbound) = harness();
        let client = addr(41003);

        queues.connected_tx.send(client).unwrap();
        queues
            .inbound_tx
            .send(InboundMessage {
                addr: client,
                bytes: encode_frame(b"EXPLODE now"),
            })
            .unwrap();

        while worker.tick() {}
        let reply = outbound.try_recv().unwrap();
        let mut decoder = crate::protocol::FrameDecoder::new();
        decoder.feed(&reply.bytes);
        let payload = decoder.poll_frame().unwrap().unwrap();
        assert_eq!(&payload[..], b"unknown command");
    }

    #[test]
    fn test_bytes_after_disconnect_are_dropped() {
        let (mut worker, queues, outbound) = harness();
        let client = addr(41004);

        queues.connected_tx.send(client).unwrap();
        queues.disconnected_tx.send(client).unwrap();
        queues
            .inbound_tx
            .send(InboundMessage {
                addr: client,
                bytes: encode_frame(b"PING"),
            })
            .unwrap();

        // Connect and disconnect land in the same iteration, ahead of the
        // inbound message; the late bytes must not produce a reply.
        while worker.tick() {}
        assert!(outbound.try_recv().is_err());
    }

    #[test]
    fn test_one_message_per_iteration() {
        let (mut worker, queues, outbound) = harness();
        let client = addr(41005);

        queues.connected_tx.send(client).unwrap();
        for _ in 0..3 {
            queues
                .inbound_tx
                .send(InboundMessage {
                    addr: client,
                    bytes: encode_frame(b"PING"),
                })
                .unwrap();
        }

        assert!(worker.tick()); // connect + first message
        assert_eq!(outbound.len(), 1);
        assert!(worker.tick());
        assert_eq!(outbound.len(), 2);
        assert!(worker.tick());
        assert_eq!(outbound.len(), 3);
        assert!(!worker.tick());
    }
}
