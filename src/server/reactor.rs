//! Reactor Loop
//!
//! A single thread owns every socket: the listener, all accepted
//! connections, and the mio `Poll` that multiplexes readiness across them.
//! Each iteration blocks on one poll call with a bounded timeout, services
//! whatever became ready, then drains the outbound queue. The thread never
//! parses frames and never runs command logic; its only job is moving bytes
//! between sockets and the event queues.
//!
//! ```text
//!              ┌────────────────────────────────────────────┐
//!              │              Reactor thread                │
//!              │                                            │
//!   accept ───>│ registry: addr ⇄ token ⇄ TcpStream         │
//!   read   ───>│ per-connection read accumulator            │──> inbound queue
//!   write  <───│ per-connection send queue (partial writes) │<── outbound queue
//!              │                                            │
//!              │ poll(events, ~100ms)  ◄── waker ◄── stop() │
//!              └────────────────────────────────────────────┘
//! ```
//!
//! Failure isolation: an I/O error on one connection disconnects that
//! connection only. Accept errors and poll errors are logged and the loop
//! continues. The loop exits only when the stop flag is observed, which
//! happens within one poll timeout even with no traffic.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, warn};

use crate::server::queues::{InboundMessage, ReactorQueues, ServerStats};
use crate::server::{ServerConfig, ServerError};

/// Token for the TCP listener.
const LISTENER_TOKEN: Token = Token(0);

/// Token for the waker that interrupts the poll wait.
const WAKER_TOKEN: Token = Token(1);

/// First token handed to an accepted connection.
const CONNECTION_TOKEN_START: usize = 2;

/// Maximum readiness events processed per poll call.
const MAX_EVENTS: usize = 128;

/// Size of the stack scratch buffer each read call fills.
const SCRATCH_SIZE: usize = 4096;

/// Per-connection state owned by the reactor.
///
/// Buffers are connection-scoped on purpose: nothing here is shared across
/// connections, so a slow or hostile client cannot corrupt a neighbor's
/// data.
struct Connection {
    stream: TcpStream,
    addr: SocketAddr,
    /// Bytes read but not yet handed to the inbound queue.
    read_buf: BytesMut,
    /// Bytes accepted for writing but not yet on the wire.
    send_queue: Vec<u8>,
    /// How much of `send_queue` has been written so far.
    send_offset: usize,
}

/// The reactor loop. Owns all socket handles and the connection registry;
/// no other thread may touch them.
pub(crate) struct Reactor {
    poll: Poll,
    listener: TcpListener,
    connections: HashMap<Token, Connection>,
    addr_to_token: HashMap<SocketAddr, Token>,
    next_token: usize,
    queues: ReactorQueues,
    stats: Arc<ServerStats>,
    running: Arc<AtomicBool>,
    poll_timeout: Duration,
    /// Authoritative maximum message size; also the per-event read flush
    /// threshold, so read cap and frame cap can never diverge.
    max_payload: usize,
    local_addr: SocketAddr,
}

impl Reactor {
    /// Binds the listener and prepares the poll. Returns the reactor and
    /// the waker that interrupts its poll wait.
    ///
    /// Failing to bind is a fatal startup error, reported here before any
    /// thread is spawned.
    pub fn new(
        config: &ServerConfig,
        queues: ReactorQueues,
        stats: Arc<ServerStats>,
        running: Arc<AtomicBool>,
    ) -> Result<(Self, Arc<Waker>), ServerError> {
        let addr: SocketAddr =
            config
                .bind_address()
                .parse()
                .map_err(|e: std::net::AddrParseError| ServerError::InvalidAddress {
                    addr: config.bind_address(),
                    reason: e.to_string(),
                })?;

        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr)?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let local_addr = listener.local_addr()?;

        Ok((
            Self {
                poll,
                listener,
                connections: HashMap::new(),
                addr_to_token: HashMap::new(),
                next_token: CONNECTION_TOKEN_START,
                queues,
                stats,
                running,
                poll_timeout: config.poll_timeout,
                max_payload: config.max_payload,
                local_addr,
            },
            waker,
        ))
    }

    /// The address the listener actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the loop until the stop flag is observed. A stop request takes
    /// effect within one poll timeout; the current iteration always
    /// completes first.
    pub fn run(mut self) {
        info!(addr = %self.local_addr, "Reactor listening");
        let mut events = Events::with_capacity(MAX_EVENTS);

        while self.running.load(Ordering::Relaxed) {
            if let Err(e) = self.poll.poll(&mut events, Some(self.poll_timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Poll failed");
                continue;
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_ready(),
                    WAKER_TOKEN => {
                        // Woken for outbound work or stop; both handled below.
                    }
                    token => {
                        if event.is_readable() {
                            self.read_ready(token);
                        }
                        if event.is_writable() {
                            self.write_ready(token);
                        }
                    }
                }
            }

            self.drain_outbound();
        }

        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            self.disconnect(token);
        }
        info!(addr = %self.local_addr, "Reactor stopped");
    }

    /// Accepts every pending connection. One failed accept never takes the
    /// loop down.
    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;

                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        error!(client = %addr, error = %e, "Failed to register connection");
                        continue;
                    }

                    self.connections.insert(
                        token,
                        Connection {
                            stream,
                            addr,
                            read_buf: BytesMut::new(),
                            send_queue: Vec::new(),
                            send_offset: 0,
                        },
                    );
                    self.addr_to_token.insert(addr, token);
                    self.stats.connection_opened();

                    if self.queues.connected_tx.send(addr).is_err() {
                        debug!(client = %addr, "Worker gone, connect event dropped");
                    }
                    info!(client = %addr, "Client connected");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    break;
                }
            }
        }
    }

    /// Reads everything immediately available on the connection.
    ///
    /// Bytes accumulate in the connection's own buffer and are flushed to
    /// the inbound queue either when the accumulator reaches the maximum
    /// message size or when the socket has no more data. Reading always
    /// continues to `WouldBlock` so edge-triggered polling cannot strand
    /// data in the kernel.
    fn read_ready(&mut self, token: Token) {
        let conn = match self.connections.get_mut(&token) {
            Some(c) => c,
            None => return,
        };

        let mut scratch = [0u8; SCRATCH_SIZE];
        let mut closed = false;
        loop {
            match conn.stream.read(&mut scratch) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => {
                    self.stats.bytes_read(n);
                    conn.read_buf.extend_from_slice(&scratch[..n]);
                    if conn.read_buf.len() >= self.max_payload {
                        flush_inbound(&self.queues, &self.stats, conn);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(client = %conn.addr, error = %e, "Read failed");
                    closed = true;
                    break;
                }
            }
        }

        if !conn.read_buf.is_empty() {
            flush_inbound(&self.queues, &self.stats, conn);
        }
        if closed {
            self.disconnect(token);
        }
    }

    /// Resumes a partially written send queue once the socket is writable
    /// again.
    fn write_ready(&mut self, token: Token) {
        self.try_flush(token);
    }

    /// Drains the outbound queue, run after I/O dispatch each iteration.
    /// A reply addressed to a client that already went away is logged and
    /// discarded.
    fn drain_outbound(&mut self) {
        while let Ok(msg) = self.queues.outbound_rx.try_recv() {
            let token = match self.addr_to_token.get(&msg.addr) {
                Some(t) => *t,
                None => {
                    warn!(client = %msg.addr, "Client not found, dropping reply");
                    continue;
                }
            };
            if let Some(conn) = self.connections.get_mut(&token) {
                conn.send_queue.extend_from_slice(&msg.bytes);
            }
            self.try_flush(token);
        }
    }

    /// Writes as much of the connection's send queue as the socket accepts.
    /// `WouldBlock` leaves the remainder queued; the next writable event
    /// resumes it, so an accepted payload is delivered in full unless the
    /// connection fails.
    fn try_flush(&mut self, token: Token) {
        let conn = match self.connections.get_mut(&token) {
            Some(c) => c,
            None => return,
        };

        let mut failed = false;
        while conn.send_offset < conn.send_queue.len() {
            match conn.stream.write(&conn.send_queue[conn.send_offset..]) {
                Ok(0) => {
                    warn!(client = %conn.addr, "Write returned zero, disconnecting");
                    failed = true;
                    break;
                }
                Ok(n) => {
                    conn.send_offset += n;
                    self.stats.bytes_written(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(client = %conn.addr, error = %e, "Write failed");
                    failed = true;
                    break;
                }
            }
        }

        if failed {
            self.disconnect(token);
            return;
        }
        conn.send_queue.clear();
        conn.send_offset = 0;
    }

    /// Closes the connection, removes it from the registry and emits a
    /// disconnect event. Safe to call repeatedly for the same token.
    fn disconnect(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            self.addr_to_token.remove(&conn.addr);
            self.stats.connection_closed();

            if self.queues.disconnected_tx.send(conn.addr).is_err() {
                debug!(client = %conn.addr, "Worker gone, disconnect event dropped");
            }
            info!(
                client = %conn.addr,
                total_messages = self.stats.inbound_messages.load(Ordering::Relaxed),
                total_bytes = self.stats.bytes_read.load(Ordering::Relaxed),
                "Client disconnected"
            );
        }
    }
}

/// Moves the connection's accumulated bytes into one inbound event. When
/// the queue is full the bytes are dropped and the drop is counted; losing
/// data under overload is accepted, stalling the reactor is not.
fn flush_inbound(queues: &ReactorQueues, stats: &ServerStats, conn: &mut Connection) {
    let bytes = conn.read_buf.split().freeze();
    debug!(client = %conn.addr, bytes = bytes.len(), "Inbound data");
    match queues.inbound_tx.try_send(InboundMessage {
        addr: conn.addr,
        bytes,
    }) {
        Ok(()) => stats.inbound_enqueued(),
        Err(e) => {
            stats.inbound_dropped();
            warn!(client = %conn.addr, error = %e, "Inbound queue full, dropping read");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::queues::{self, ReplySender};
    use bytes::Bytes;
    use std::net::TcpStream as StdTcpStream;
    use std::thread;
    use std::time::Instant;

    struct TestReactor {
        local_addr: SocketAddr,
        running: Arc<AtomicBool>,
        waker: Arc<Waker>,
        stats: Arc<ServerStats>,
        thread: Option<thread::JoinHandle<()>>,
    }

    impl TestReactor {
        fn stop(&mut self) {
            self.running.store(false, Ordering::Relaxed);
            let _ = self.waker.wake();
            if let Some(handle) = self.thread.take() {
                handle.join().unwrap();
            }
        }
    }

    /// Spawns a reactor with nothing draining the inbound queue, so tests
    /// can observe raw reactor behavior including saturation.
    fn spawn_bare_reactor(
        queue_capacity: usize,
    ) -> (TestReactor, crate::server::queues::WorkerQueues, ReplySender) {
        let config = ServerConfig {
            port: 0,
            queue_capacity,
            ..ServerConfig::default()
        };
        let stats = Arc::new(ServerStats::new());
        let running = Arc::new(AtomicBool::new(true));
        let (reactor_queues, worker_queues, outbound_tx) = queues::channels(queue_capacity);
        let (reactor, waker) =
            Reactor::new(&config, reactor_queues, stats.clone(), running.clone()).unwrap();
        let local_addr = reactor.local_addr();
        let replies = ReplySender::new(outbound_tx, waker.clone(), stats.clone());
        let thread = thread::spawn(move || reactor.run());

        (
            TestReactor {
                local_addr,
                running,
                waker,
                stats,
                thread: Some(thread),
            },
            worker_queues,
            replies,
        )
    }

    fn wait_until(deadline: Duration, mut probe: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if probe() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_accept_emits_connect_event_and_inbound_bytes() {
        let (mut reactor, worker, _replies) = spawn_bare_reactor(16);

        let mut client = StdTcpStream::connect(reactor.local_addr).unwrap();
        let connected = worker
            .connected_rx
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(connected, client.local_addr().unwrap());

        client.write_all(b"raw bytes").unwrap();
        let inbound = worker
            .inbound_rx
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(inbound.addr, connected);
        assert_eq!(&inbound.bytes[..], b"raw bytes");

        reactor.stop();
    }

    #[test]
    fn test_peer_close_emits_disconnect_event() {
        let (mut reactor, worker, _replies) = spawn_bare_reactor(16);

        let client = StdTcpStream::connect(reactor.local_addr).unwrap();
        let addr = worker
            .connected_rx
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        drop(client);

        let disconnected = worker
            .disconnected_rx
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(disconnected, addr);
        assert!(wait_until(Duration::from_secs(2), || {
            reactor.stats.active_connections.load(Ordering::Relaxed) == 0
        }));

        reactor.stop();
    }

    #[test]
    fn test_outbound_bytes_reach_the_client() {
        let (mut reactor, worker, replies) = spawn_bare_reactor(16);

        let mut client = StdTcpStream::connect(reactor.local_addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let addr = worker
            .connected_rx
            .recv_timeout(Duration::from_secs(2))
            .unwrap();

        assert!(replies.send(addr, Bytes::from_static(b"pong")));
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");

        reactor.stop();
    }

    #[test]
    fn test_reply_for_unknown_client_is_discarded() {
        let (mut reactor, _worker, replies) = spawn_bare_reactor(16);

        let ghost: SocketAddr = "127.0.0.1:1".parse().unwrap();
        // Accepted into the queue, dropped by the reactor; the loop and
        // future clients must be unaffected.
        assert!(replies.send(ghost, Bytes::from_static(b"to nobody")));

        let client = StdTcpStream::connect(reactor.local_addr).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            reactor.stats.connections_accepted.load(Ordering::Relaxed) == 1
        }));
        drop(client);

        reactor.stop();
    }

    #[test]
    fn test_inbound_saturation_does_not_block_other_clients() {
        // Capacity 1 and no consumer: the second flush must be dropped,
        // not block the loop.
        let (mut reactor, worker, replies) = spawn_bare_reactor(1);

        let mut noisy = StdTcpStream::connect(reactor.local_addr).unwrap();
        let noisy_addr = worker
            .connected_rx
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(noisy_addr, noisy.local_addr().unwrap());

        // Two separate sends, each large enough to be its own inbound
        // event; the queue holds one.
        for _ in 0..2 {
            noisy.write_all(&[0xaa; 1024]).unwrap();
            thread::sleep(Duration::from_millis(50));
        }
        assert!(wait_until(Duration::from_secs(2), || {
            reactor.stats.inbound_dropped.load(Ordering::Relaxed) >= 1
        }));

        // The reactor still accepts and serves a second client.
        let mut other = StdTcpStream::connect(reactor.local_addr).unwrap();
        other
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let other_addr = worker
            .connected_rx
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert!(replies.send(other_addr, Bytes::from_static(b"alive")));
        let mut buf = [0u8; 16];
        let n = other.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"alive");

        reactor.stop();
    }

    #[test]
    fn test_stop_returns_within_poll_timeout() {
        let (mut reactor, _worker, _replies) = spawn_bare_reactor(16);
        let local_addr = reactor.local_addr;

        let start = Instant::now();
        reactor.stop();
        // One poll timeout (100 ms) plus generous scheduling slack.
        assert!(start.elapsed() < Duration::from_secs(1));

        // No further accepts once stopped.
        assert!(StdTcpStream::connect(local_addr).is_err());
    }

    #[test]
    fn test_invalid_address_is_a_startup_error() {
        let config = ServerConfig {
            host: "not an address".to_string(),
            ..ServerConfig::default()
        };
        let stats = Arc::new(ServerStats::new());
        let running = Arc::new(AtomicBool::new(true));
        let (reactor_queues, _worker_queues, _outbound_tx) = queues::channels(4);
        let result = Reactor::new(&config, reactor_queues, stats, running);
        assert!(matches!(
            result,
            Err(ServerError::InvalidAddress { .. })
        ));
    }
}
