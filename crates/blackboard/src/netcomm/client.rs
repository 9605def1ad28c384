// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network client session with connection state machine.
//!
//! # State Machine
//!
//! ```text
//!      +--------------+
//!      | Disconnected |<-----------------------------+
//!      +------+-------+                              |
//!             | connect()                            |
//!             v                                      |
//!      +--------------+  interrupt_connect()/timeout |
//!      |  Connecting  |------------------------------+
//!      +------+-------+                              |
//!             | peer hello                           |
//!             v                                      |
//!      +--------------+  disconnect()                |
//!      | Established  |------------------------------+
//!      +------+-------+
//!             | I/O failure / protocol violation
//!             v
//!      +--------------+
//!      |     Dead     |--- connect() ---> Connecting
//!      +--------------+
//! ```
//!
//! Each session gets a generation number. Events raised by I/O threads of an
//! older generation are ignored, so a late failure report from a torn-down
//! session can never kill its successor.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};

use super::frame_codec::FrameCodec;
use super::handler::ClientHandler;
use super::message::NetworkMessage;
use super::{COMPONENT_NETCOMM, PROTOCOL_VERSION};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::message_queue::next_queue_uid;

// ============================================================================
// Connection State
// ============================================================================

/// Session state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session
    #[default]
    Disconnected,

    /// TCP connect or hello exchange in progress
    Connecting,

    /// Hello exchanged, traffic flows
    Established,

    /// Session failed; enqueue fails until the next connect
    Dead,
}

impl ConnectionState {
    /// Check if messages can be sent.
    pub fn is_operational(&self) -> bool {
        matches!(self, ConnectionState::Established)
    }

    /// Check if the session failed.
    pub fn is_dead(&self) -> bool {
        matches!(self, ConnectionState::Dead)
    }

    /// Check if `connect()` is allowed from this state.
    pub fn can_connect(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Dead)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Established => "Established",
            ConnectionState::Dead => "Dead",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters over the lifetime of a client (session control frames excluded).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Messages written to the socket
    pub messages_sent: u64,
    /// Payload bytes written
    pub bytes_sent: u64,
    /// Messages received for any component
    pub messages_received: u64,
    /// Payload bytes received
    pub bytes_received: u64,
    /// Inbound messages without a registered handler
    pub messages_dropped: u64,
    /// Sessions that reached `Established`
    pub sessions_established: u64,
}

#[derive(Default)]
struct StatsCounters {
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
    messages_dropped: AtomicU64,
    sessions_established: AtomicU64,
}

impl StatsCounters {
    fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ClientStats {
        ClientStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            sessions_established: self.sessions_established.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Shared state
// ============================================================================

#[derive(Debug)]
enum DeathCause {
    Io(String),
    Protocol(String),
}

impl fmt::Display for DeathCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeathCause::Io(reason) => write!(f, "I/O failure: {}", reason),
            DeathCause::Protocol(reason) => write!(f, "protocol violation: {}", reason),
        }
    }
}

struct ConnState {
    state: ConnectionState,
    interrupted: bool,
    generation: u64,
    cause: Option<DeathCause>,
}

/// State reachable from the I/O threads.
struct Shared {
    config: ClientConfig,
    client_id: Option<u32>,
    /// Membership marker of messages waiting in the outbound channel
    outbound_uid: u64,
    conn: Mutex<ConnState>,
    conn_cond: Condvar,
    handlers: RwLock<HashMap<u16, Arc<dyn ClientHandler>>>,
    /// Per-component count of received messages and wakeups for `wait()`
    recv_seq: Mutex<HashMap<u16, u64>>,
    recv_cond: Condvar,
    outbound: Mutex<Option<Sender<Message<NetworkMessage>>>>,
    stats: StatsCounters,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        self.conn.lock().state
    }

    /// True while the session of `generation` is connecting or established.
    fn is_live(&self, generation: u64) -> bool {
        let conn = self.conn.lock();
        conn.generation == generation
            && matches!(
                conn.state,
                ConnectionState::Connecting | ConnectionState::Established
            )
    }

    fn handlers_snapshot(&self) -> Vec<Arc<dyn ClientHandler>> {
        self.handlers.read().values().cloned().collect()
    }

    fn mark_established(&self, generation: u64) {
        {
            let mut conn = self.conn.lock();
            if conn.generation != generation
                || conn.state != ConnectionState::Connecting
                || conn.interrupted
            {
                return;
            }
            conn.state = ConnectionState::Established;
            self.conn_cond.notify_all();
        }
        self.stats
            .sessions_established
            .fetch_add(1, Ordering::Relaxed);
        for handler in self.handlers_snapshot() {
            handler.connection_established(self.client_id);
        }
    }

    fn mark_dead(&self, generation: u64, cause: DeathCause) {
        let was_established = {
            let mut conn = self.conn.lock();
            if conn.generation != generation
                || !matches!(
                    conn.state,
                    ConnectionState::Connecting | ConnectionState::Established
                )
            {
                return;
            }
            let was_established = conn.state == ConnectionState::Established;
            log::warn!("[netcomm] connection died ({})", cause);
            conn.state = ConnectionState::Dead;
            conn.cause = Some(cause);
            self.conn_cond.notify_all();
            was_established
        };
        self.wake_all();
        if was_established {
            for handler in self.handlers_snapshot() {
                handler.connection_died(self.client_id);
            }
        }
    }

    /// Report an I/O thread failure unless the session is being torn down.
    fn report_failure(&self, generation: u64, stop: &AtomicBool, cause: DeathCause) {
        if stop.load(Ordering::Acquire) {
            log::debug!("[netcomm] ignoring failure during shutdown ({})", cause);
            return;
        }
        self.mark_dead(generation, cause);
    }

    fn dispatch(&self, msg: NetworkMessage) {
        let component_id = msg.component_id();
        self.stats.record_received(msg.payload_size());
        let handler = self.handlers.read().get(&component_id).cloned();
        match handler {
            Some(handler) => handler.inbound_received(&Message::new(msg), self.client_id),
            None => {
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "[netcomm] dropping message type {} for unregistered component {}",
                    msg.message_type(),
                    component_id
                );
            }
        }
        self.wake(component_id);
    }

    fn wake(&self, component_id: u16) {
        let mut seq = self.recv_seq.lock();
        let counter = seq.entry(component_id).or_insert(0);
        *counter = counter.wrapping_add(1);
        self.recv_cond.notify_all();
    }

    /// Wake every waiter without marking anything received.
    fn wake_all(&self) {
        let _seq = self.recv_seq.lock();
        self.recv_cond.notify_all();
    }

    fn recv_seq(&self, component_id: u16) -> u64 {
        self.recv_seq.lock().get(&component_id).copied().unwrap_or(0)
    }
}

// ============================================================================
// Session
// ============================================================================

struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    stop: Arc<AtomicBool>,
    sender: Option<JoinHandle<()>>,
    receiver: Option<JoinHandle<()>>,
}

// ============================================================================
// Client
// ============================================================================

/// Client end of a component-routed message session.
///
/// # Example
///
/// ```no_run
/// use blackboard::config::ClientConfig;
/// use blackboard::netcomm::{NetworkClient, NetworkMessage};
/// use blackboard::Message;
///
/// let client = NetworkClient::new(ClientConfig::default());
/// client.connect("localhost", 1910)?;
/// client.enqueue_and_wait(&Message::new(NetworkMessage::signal(3, 1)))?;
/// # Ok::<(), blackboard::Error>(())
/// ```
pub struct NetworkClient {
    shared: Arc<Shared>,
    /// Held for the whole of `connect()` and while tearing a session down
    session: Mutex<Option<Session>>,
    target: Mutex<Option<(String, u16)>>,
}

impl NetworkClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::build(None, config)
    }

    /// Client whose id is passed to every handler callback.
    pub fn with_id(id: u32, config: ClientConfig) -> Self {
        Self::build(Some(id), config)
    }

    fn build(client_id: Option<u32>, config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                client_id,
                outbound_uid: next_queue_uid(),
                conn: Mutex::new(ConnState {
                    state: ConnectionState::Disconnected,
                    interrupted: false,
                    generation: 0,
                    cause: None,
                }),
                conn_cond: Condvar::new(),
                handlers: RwLock::new(HashMap::new()),
                recv_seq: Mutex::new(HashMap::new()),
                recv_cond: Condvar::new(),
                outbound: Mutex::new(None),
                stats: StatsCounters::default(),
            }),
            session: Mutex::new(None),
            target: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn id(&self) -> Option<u32> {
        self.shared.client_id
    }

    pub fn has_id(&self) -> bool {
        self.shared.client_id.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// True while the session is established.
    pub fn connected(&self) -> bool {
        self.state().is_operational()
    }

    pub fn stats(&self) -> ClientStats {
        self.shared.stats.snapshot()
    }

    /// Address of the connected peer.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.session.lock().as_ref().map(|s| s.peer)
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Connect and block until the hello exchange completes.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyConnected`] unless `Disconnected` or `Dead`
    /// - [`Error::ConnectInterrupted`] if [`interrupt_connect`](Self::interrupt_connect) was called
    /// - [`Error::ConnectTimeout`] if the TCP connect or hello timed out
    /// - [`Error::Protocol`] if the peer's hello is malformed or mismatched
    /// - [`Error::Io`] if the peer cannot be reached
    ///
    /// On error the client is back in `Disconnected` with no threads left.
    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.shared.config.validate()?;
        *self.target.lock() = Some((host.to_string(), port));

        let mut session = self.session.lock();
        let generation = {
            let mut conn = self.shared.conn.lock();
            if !conn.state.can_connect() {
                return Err(Error::AlreadyConnected);
            }
            conn.state = ConnectionState::Connecting;
            conn.interrupted = false;
            conn.cause = None;
            conn.generation = conn.generation.wrapping_add(1);
            conn.generation
        };

        // Threads of a dead predecessor
        if let Some(old) = session.take() {
            self.teardown(old);
        }

        log::debug!("[netcomm] connecting to {}:{}", host, port);
        match self.establish(host, port, generation, &mut session) {
            Ok(()) => {
                log::info!("[netcomm] connected to {}:{}", host, port);
                Ok(())
            }
            Err(e) => {
                if let Some(partial) = session.take() {
                    self.teardown(partial);
                }
                {
                    let mut conn = self.shared.conn.lock();
                    if conn.generation == generation {
                        conn.state = ConnectionState::Disconnected;
                        conn.interrupted = false;
                    }
                }
                log::debug!("[netcomm] connect to {}:{} failed: {}", host, port, e);
                Err(e)
            }
        }
    }

    /// Connect again to the target of the last `connect()` call.
    pub fn reconnect(&self) -> Result<()> {
        let target = self.target.lock().clone();
        match target {
            Some((host, port)) => self.connect(&host, port),
            None => Err(Error::Config("no previous connect target".into())),
        }
    }

    /// Abort a pending `connect()`; no-op in any other state.
    pub fn interrupt_connect(&self) {
        let mut conn = self.shared.conn.lock();
        if conn.state == ConnectionState::Connecting {
            conn.interrupted = true;
            self.shared.conn_cond.notify_all();
            log::debug!("[netcomm] connect interrupted");
        }
    }

    /// Close the session and notify handlers if it was established.
    pub fn disconnect(&self) {
        self.interrupt_connect();
        let mut session = self.session.lock();
        let previous = {
            let mut conn = self.shared.conn.lock();
            let previous = conn.state;
            conn.state = ConnectionState::Disconnected;
            conn.interrupted = false;
            conn.generation = conn.generation.wrapping_add(1);
            self.shared.conn_cond.notify_all();
            previous
        };
        if let Some(current) = session.take() {
            self.teardown(current);
        }
        drop(session);

        self.shared.wake_all();
        if previous == ConnectionState::Established {
            log::info!("[netcomm] disconnected");
            for handler in self.shared.handlers_snapshot() {
                handler.connection_died(self.shared.client_id);
            }
        }
    }

    fn establish(
        &self,
        host: &str,
        port: u16,
        generation: u64,
        slot: &mut Option<Session>,
    ) -> Result<()> {
        let config = &self.shared.config;
        let stream = open_stream(host, port, config)?;
        if self.shared.conn.lock().interrupted {
            return Err(Error::ConnectInterrupted);
        }

        let peer = stream.peer_addr()?;
        stream.set_read_timeout(Some(config.recv_poll_interval))?;
        let recv_stream = stream.try_clone()?;
        let send_stream = stream.try_clone()?;

        let (tx, rx) = channel::unbounded();
        *self.shared.outbound.lock() = Some(tx);

        let stop = Arc::new(AtomicBool::new(false));
        let session = slot.insert(Session {
            stream,
            peer,
            stop: Arc::clone(&stop),
            sender: None,
            receiver: None,
        });

        let shared = Arc::clone(&self.shared);
        let thread_stop = Arc::clone(&stop);
        session.sender = Some(
            thread::Builder::new()
                .name("bb-netcomm-send".into())
                .spawn(move || sender_loop(&shared, send_stream, rx, &thread_stop, generation))?,
        );

        let shared = Arc::clone(&self.shared);
        let thread_stop = Arc::clone(&stop);
        session.receiver = Some(
            thread::Builder::new()
                .name("bb-netcomm-recv".into())
                .spawn(move || receiver_loop(&shared, recv_stream, &thread_stop, generation))?,
        );

        self.wait_established(generation)
    }

    fn wait_established(&self, generation: u64) -> Result<()> {
        let deadline = self
            .shared
            .config
            .handshake_timeout
            .and_then(|t| Instant::now().checked_add(t));
        let mut conn = self.shared.conn.lock();
        loop {
            if conn.generation != generation {
                return Err(Error::ConnectInterrupted);
            }
            match conn.state {
                ConnectionState::Established => return Ok(()),
                ConnectionState::Dead => {
                    return Err(match &conn.cause {
                        Some(DeathCause::Protocol(reason)) => Error::Protocol(reason.clone()),
                        _ => Error::ConnectionDead,
                    })
                }
                _ => {}
            }
            if conn.interrupted {
                return Err(Error::ConnectInterrupted);
            }
            match deadline {
                Some(deadline) => {
                    let timed_out = self.shared.conn_cond.wait_until(&mut conn, deadline).timed_out();
                    if timed_out && conn.state == ConnectionState::Connecting && !conn.interrupted {
                        return Err(Error::ConnectTimeout);
                    }
                }
                None => self.shared.conn_cond.wait(&mut conn),
            }
        }
    }

    /// Stop both I/O threads of `session` and wait for them.
    fn teardown(&self, mut session: Session) {
        session.stop.store(true, Ordering::Release);
        self.shared.outbound.lock().take();
        let _ = session.stream.shutdown(Shutdown::Both);

        let me = thread::current().id();
        for handle in [session.sender.take(), session.receiver.take()]
            .into_iter()
            .flatten()
        {
            // A handler calling disconnect() runs on the receiver thread.
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                log::warn!("[netcomm] I/O thread panicked");
            }
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Queue a message for asynchronous transmission.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionDead`] if the session died
    /// - [`Error::NotConnected`] if no session is established
    /// - [`Error::PayloadTooLarge`] above `max_payload_size`
    /// - [`Error::AlreadyQueued`] if the message is still waiting to be sent
    ///   or is a member of a message queue
    pub fn enqueue(&self, msg: &Message<NetworkMessage>) -> Result<()> {
        match self.state() {
            ConnectionState::Established => {}
            ConnectionState::Dead => return Err(Error::ConnectionDead),
            _ => return Err(Error::NotConnected),
        }
        let size = msg.payload().payload_size();
        let max = self.shared.config.max_payload_size;
        if size > max {
            return Err(Error::PayloadTooLarge { size, max });
        }

        msg.claim(self.shared.outbound_uid)?;
        let sent = match self.shared.outbound.lock().as_ref() {
            Some(tx) => tx.send(msg.clone()).is_ok(),
            None => false,
        };
        if !sent {
            msg.release();
            return Err(Error::ConnectionDead);
        }
        Ok(())
    }

    /// Wrap and queue a wire message.
    pub fn send(&self, msg: NetworkMessage) -> Result<()> {
        self.enqueue(&Message::new(msg))
    }

    /// Queue `msg` and block until a message for its component arrives.
    ///
    /// Bounded by `ClientConfig::wait_timeout`. Concurrent callers on the
    /// same component are each released by the first arrival after their
    /// own enqueue.
    pub fn enqueue_and_wait(&self, msg: &Message<NetworkMessage>) -> Result<()> {
        let component_id = msg.payload().component_id();
        let seen = self.shared.recv_seq(component_id);
        self.enqueue(msg)?;
        self.wait_received(component_id, seen, self.shared.config.wait_timeout)
    }

    /// Block until the next message for `component_id` arrives or
    /// [`wake`](Self::wake) is called for it.
    ///
    /// # Errors
    ///
    /// [`Error::WaitTimeout`] after `timeout`; [`Error::ConnectionDead`] or
    /// [`Error::NotConnected`] if the session ends first.
    pub fn wait(&self, component_id: u16, timeout: Option<Duration>) -> Result<()> {
        let seen = self.shared.recv_seq(component_id);
        self.wait_received(component_id, seen, timeout)
    }

    /// Release waiters of `component_id` as if a message had arrived.
    pub fn wake(&self, component_id: u16) {
        self.shared.wake(component_id);
    }

    /// Block until the receive counter of `component_id` moves past `seen`.
    fn wait_received(&self, component_id: u16, seen: u64, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut seq = self.shared.recv_seq.lock();
        loop {
            if seq.get(&component_id).copied().unwrap_or(0) != seen {
                return Ok(());
            }
            match self.shared.state() {
                ConnectionState::Established => {}
                ConnectionState::Dead => return Err(Error::ConnectionDead),
                _ => return Err(Error::NotConnected),
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.recv_cond.wait_until(&mut seq, deadline).timed_out() {
                        if seq.get(&component_id).copied().unwrap_or(0) != seen {
                            return Ok(());
                        }
                        return Err(Error::WaitTimeout { component_id });
                    }
                }
                None => self.shared.recv_cond.wait(&mut seq),
            }
        }
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Route messages of `component_id` to `handler`.
    ///
    /// # Errors
    ///
    /// [`Error::HandlerAlreadyRegistered`] if the id is taken.
    pub fn register_handler(&self, handler: Arc<dyn ClientHandler>, component_id: u16) -> Result<()> {
        let mut handlers = self.shared.handlers.write();
        if handlers.contains_key(&component_id) {
            return Err(Error::HandlerAlreadyRegistered(component_id));
        }
        handlers.insert(component_id, handler);
        log::debug!("[netcomm] handler registered for component {}", component_id);
        Ok(())
    }

    /// Remove the handler of `component_id` and release its waiters.
    ///
    /// Returns false if no handler was registered.
    pub fn deregister_handler(&self, component_id: u16) -> bool {
        let removed = self.shared.handlers.write().remove(&component_id);
        match removed {
            Some(handler) => {
                handler.deregistered(self.shared.client_id);
                self.shared.wake(component_id);
                log::debug!("[netcomm] handler deregistered for component {}", component_id);
                true
            }
            None => false,
        }
    }

    pub fn has_handler(&self, component_id: u16) -> bool {
        self.shared.handlers.read().contains_key(&component_id)
    }
}

impl Default for NetworkClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Drop for NetworkClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkClient")
            .field("id", &self.shared.client_id)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Socket setup
// ============================================================================

fn open_stream(host: &str, port: u16, config: &ClientConfig) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match connect_addr(addr, config) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                log::debug!("[netcomm] connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    match last_err {
        Some(e) if e.kind() == io::ErrorKind::TimedOut => Err(Error::ConnectTimeout),
        Some(e) => Err(e.into()),
        None => Err(Error::Io(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{}:{} did not resolve", host, port),
        ))),
    }
}

fn connect_addr(addr: SocketAddr, config: &ClientConfig) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(config.nodelay)?;
    if let Some(interval) = config.keepalive {
        socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(interval))?;
    }
    socket.connect_timeout(&addr.into(), config.connect_timeout)?;
    Ok(socket.into())
}

// ============================================================================
// I/O threads
// ============================================================================

fn sender_loop(
    shared: &Shared,
    mut stream: TcpStream,
    rx: Receiver<Message<NetworkMessage>>,
    stop: &AtomicBool,
    generation: u64,
) {
    let mut buf = Vec::with_capacity(1024);
    NetworkMessage::hello().encode_into(&mut buf);

    match stream.write_all(&buf) {
        Ok(()) => loop {
            if stop.load(Ordering::Acquire) {
                break;
            }
            match rx.recv_timeout(shared.config.recv_poll_interval) {
                Ok(msg) => {
                    buf.clear();
                    msg.payload().encode_into(&mut buf);
                    let written = stream.write_all(&buf);
                    msg.release();
                    if let Err(e) = written {
                        let _ = stream.shutdown(Shutdown::Both);
                        shared.report_failure(generation, stop, DeathCause::Io(e.to_string()));
                        break;
                    }
                    shared.stats.record_sent(msg.payload().payload_size());
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !shared.is_live(generation) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        },
        Err(e) => {
            shared.report_failure(generation, stop, DeathCause::Io(format!("sending hello: {}", e)));
        }
    }

    // Unsent messages become enqueueable again
    for msg in rx.try_iter() {
        msg.release();
    }
}

fn receiver_loop(shared: &Shared, mut stream: TcpStream, stop: &AtomicBool, generation: u64) {
    let mut codec = FrameCodec::new(shared.config.max_payload_size);
    let mut established = false;

    while !stop.load(Ordering::Acquire) {
        let msg = match codec.decode(&mut stream) {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                if !shared.is_live(generation) {
                    break;
                }
                continue;
            }
            Err(e) => {
                let cause = if matches!(e, Error::PayloadTooLarge { .. }) {
                    DeathCause::Protocol(e.to_string())
                } else {
                    DeathCause::Io(e.to_string())
                };
                let _ = stream.shutdown(Shutdown::Both);
                shared.report_failure(generation, stop, cause);
                break;
            }
        };

        if !established {
            let verdict = match msg.hello_version() {
                Ok(version) if version == PROTOCOL_VERSION => Ok(()),
                Ok(version) => Err(format!(
                    "peer speaks protocol version {}, expected {}",
                    version, PROTOCOL_VERSION
                )),
                Err(Error::Protocol(reason)) => Err(reason),
                Err(other) => Err(other.to_string()),
            };
            match verdict {
                Ok(()) => {
                    established = true;
                    shared.mark_established(generation);
                }
                Err(reason) => {
                    let _ = stream.shutdown(Shutdown::Both);
                    shared.report_failure(generation, stop, DeathCause::Protocol(reason));
                    break;
                }
            }
            continue;
        }

        if msg.component_id() == COMPONENT_NETCOMM {
            log::debug!(
                "[netcomm] ignoring control message type {}",
                msg.message_type()
            );
            continue;
        }
        shared.dispatch(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        deregistered: AtomicUsize,
    }

    impl ClientHandler for Counting {
        fn inbound_received(&self, _msg: &Message<NetworkMessage>, _client_id: Option<u32>) {}

        fn deregistered(&self, _client_id: Option<u32>) {
            self.deregistered.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Established.to_string(), "Established");
        assert!(ConnectionState::Dead.can_connect());
        assert!(!ConnectionState::Connecting.can_connect());
        assert!(ConnectionState::Established.is_operational());
    }

    #[test]
    fn test_initial_state() {
        let client = NetworkClient::with_id(7, ClientConfig::default());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.connected());
        assert_eq!(client.id(), Some(7));
        assert!(client.peer_addr().is_none());
    }

    #[test]
    fn test_enqueue_requires_session() {
        let client = NetworkClient::default();
        let msg = Message::new(NetworkMessage::signal(3, 1));
        assert!(matches!(client.enqueue(&msg), Err(Error::NotConnected)));
        assert!(!msg.is_queued());
        assert!(matches!(client.wait(3, None), Err(Error::NotConnected)));
    }

    #[test]
    fn test_handler_registration() {
        let client = NetworkClient::default();
        let handler = Arc::new(Counting {
            deregistered: AtomicUsize::new(0),
        });
        client.register_handler(handler.clone(), 5).unwrap();
        assert!(matches!(
            client.register_handler(handler.clone(), 5),
            Err(Error::HandlerAlreadyRegistered(5))
        ));

        assert!(client.deregister_handler(5));
        assert!(!client.deregister_handler(5));
        assert_eq!(handler.deregistered.load(Ordering::SeqCst), 1);
        client.register_handler(handler, 5).unwrap();
        assert!(client.has_handler(5));
    }

    #[test]
    fn test_connect_refused_returns_to_disconnected() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = NetworkClient::default();
        assert!(client.connect("127.0.0.1", port).is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_reconnect_without_target() {
        let client = NetworkClient::default();
        assert!(matches!(client.reconnect(), Err(Error::Config(_))));
    }

    #[test]
    fn test_interrupt_when_idle_is_noop() {
        let client = NetworkClient::default();
        client.interrupt_connect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
