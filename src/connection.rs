use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ConnError, ReadError};
use crate::frame::{Frame, StompItem};
use crate::heartbeat::{Heartbeat, HeartbeatDescriptor};
use crate::logger::LogSink;
use crate::message::MessageData;
use crate::registry::SubscriptionRegistry;
use crate::subscription::Subscription;
use crate::version;

/// How long the writer waits for the transport to close after a stop.
const SINK_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Lifecycle of a `Connection`.
///
/// `Initializing -> Connected` happens in [`Connection::start`];
/// `Connected -> ShuttingDown -> Disconnected` only in
/// [`Connection::shutdown`]. There is no way back: reconnecting means
/// building a new `Connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Initializing = 0,
    Connected = 1,
    ShuttingDown = 2,
    Disconnected = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Initializing,
            1 => ConnectionState::Connected,
            2 => ConnectionState::ShuttingDown,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Initializing => "initializing",
            ConnectionState::Connected => "connected",
            ConnectionState::ShuttingDown => "shutting-down",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builder for a [`Connection`].
///
/// Carries what the handshake collaborator settled (session id, protocol
/// version, negotiated heartbeat intervals) plus queue sizing and an
/// optional log sink.
///
/// ```ignore
/// let conn = Connection::builder()
///     .session("session-42")
///     .protocol("1.2")
///     .negotiate_heartbeat(Heartbeat::default(), "5000,5000")
///     .build()?;
/// conn.start(transport_sink)?;
/// ```
#[derive(Clone)]
pub struct ConnectionBuilder {
    session: String,
    protocol: String,
    send_heartbeat: Option<Duration>,
    recv_heartbeat: Option<Duration>,
    input_capacity: usize,
    subscription_capacity: usize,
    outbound_capacity: usize,
    logger: Option<Arc<dyn LogSink>>,
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self {
            session: String::new(),
            protocol: "1.2".to_string(),
            send_heartbeat: None,
            recv_heartbeat: None,
            input_capacity: 32,
            subscription_capacity: 16,
            outbound_capacity: 32,
            logger: None,
        }
    }
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker-assigned session id from the CONNECTED frame.
    pub fn session(mut self, session: impl Into<String>) -> Self {
        self.session = session.into();
        self
    }

    /// Negotiated protocol version; validated by [`build`](Self::build).
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Already-negotiated heartbeat intervals. `None` disables a direction.
    pub fn heartbeat(mut self, send: Option<Duration>, recv: Option<Duration>) -> Self {
        self.send_heartbeat = send;
        self.recv_heartbeat = recv;
        self
    }

    /// Negotiate the client configuration against the broker's
    /// `heart-beat` header and use the result.
    pub fn negotiate_heartbeat(self, client: Heartbeat, server_header: &str) -> Self {
        let (send, recv) = client.negotiate(server_header);
        self.heartbeat(send, recv)
    }

    /// Capacity of the general input queue.
    pub fn input_capacity(mut self, capacity: usize) -> Self {
        self.input_capacity = capacity;
        self
    }

    /// Capacity of each subscription queue.
    pub fn subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity;
        self
    }

    /// Capacity of the queue feeding the writer task.
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    pub fn logger(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.logger = Some(sink);
        self
    }

    /// Build an `Initializing` connection. No tasks run until
    /// [`Connection::start`].
    pub fn build(self) -> Result<Connection, ConnError> {
        if !version::supported(&self.protocol) {
            return Err(ConnError::UnsupportedVersion(self.protocol));
        }
        let (input_tx, input_rx) = mpsc::channel(self.input_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_capacity.max(1));
        Ok(Connection {
            inner: Arc::new(Inner {
                state: AtomicU8::new(ConnectionState::Initializing as u8),
                session: self.session,
                protocol: self.protocol,
                log_enabled: AtomicBool::new(self.logger.is_some()),
                logger: RwLock::new(self.logger),
                negotiated: (self.send_heartbeat, self.recv_heartbeat),
                heartbeat: StdMutex::new(None),
                subscriptions: SubscriptionRegistry::new(self.subscription_capacity),
                input_tx,
                input_rx: Mutex::new(input_rx),
                outbound_tx,
                outbound_rx: StdMutex::new(Some(outbound_rx)),
                writer_stop: CancellationToken::new(),
                reader_stop: CancellationToken::new(),
            }),
        })
    }
}

struct Inner {
    state: AtomicU8,
    session: String,
    protocol: String,
    /// Mirrors `logger.is_some()` so the no-sink path skips the lock.
    log_enabled: AtomicBool,
    logger: RwLock<Option<Arc<dyn LogSink>>>,
    negotiated: (Option<Duration>, Option<Duration>),
    /// Present only while heartbeat tasks may be running.
    heartbeat: StdMutex<Option<Arc<HeartbeatDescriptor>>>,
    subscriptions: SubscriptionRegistry,
    /// General queue for data/errors with no specific subscriber.
    input_tx: mpsc::Sender<MessageData>,
    /// Shared behind a mutex so cloned handles can call `next_message`
    /// concurrently (they serialize on the mutex).
    input_rx: Mutex<mpsc::Receiver<MessageData>>,
    outbound_tx: mpsc::Sender<StompItem>,
    /// Taken by the writer task on `start`.
    outbound_rx: StdMutex<Option<mpsc::Receiver<StompItem>>>,
    writer_stop: CancellationToken,
    reader_stop: CancellationToken,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> Result<(), ConnError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|found| ConnError::InvalidState {
                expected: from.as_str(),
                found: ConnectionState::from_u8(found).as_str(),
            })
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // The last handle is gone; make sure no task outlives it.
        let hb = self
            .heartbeat
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hb) = hb {
            hb.stop();
        }
        self.writer_stop.cancel();
        self.reader_stop.cancel();
    }
}

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One logical STOMP session over a broker.
///
/// A `Connection` owns the session state, the negotiated heartbeat
/// descriptor, the subscription registry and the general input queue, and
/// runs the background tasks tied to the session: a writer, optional
/// send/receive heartbeat tasks and an optional reader. Handles are cheap
/// to clone and share the same session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("session", &self.inner.session)
            .field("protocol", &self.inner.protocol)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Returns the current connection status.
    pub fn connected(&self) -> bool {
        self.inner.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Returns the broker assigned session id.
    pub fn session(&self) -> &str {
        &self.inner.session
    }

    /// Returns the negotiated protocol level.
    pub fn protocol(&self) -> &str {
        &self.inner.protocol
    }

    /// Install or clear (`None`) the client-defined log sink.
    pub fn set_logger(&self, sink: Option<Arc<dyn LogSink>>) {
        let mut slot = self
            .inner
            .logger
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner
            .log_enabled
            .store(sink.is_some(), Ordering::Release);
        *slot = sink;
    }

    fn log(&self, args: fmt::Arguments<'_>) {
        if !self.inner.log_enabled.load(Ordering::Acquire) {
            return;
        }
        // cloned so a sink may call back into the connection
        let sink = self
            .inner
            .logger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(sink) = sink {
            sink.log(&self.inner.session, args);
        }
    }

    fn heartbeat(&self) -> Option<Arc<HeartbeatDescriptor>> {
        lock(&self.inner.heartbeat).clone()
    }

    /// Heartbeat send interval in ms; 0 means no heartbeats are being sent
    /// (or the interval is below one millisecond).
    pub fn send_ticker_interval(&self) -> i64 {
        self.heartbeat().map_or(0, |hb| hb.send_interval_ms())
    }

    /// Heartbeat receive interval in ms; 0 means no heartbeats are expected
    /// (or the interval is below one millisecond).
    pub fn receive_ticker_interval(&self) -> i64 {
        self.heartbeat().map_or(0, |hb| hb.recv_interval_ms())
    }

    /// Number of send heartbeat ticks so far. Zero usually means send
    /// heartbeats are not enabled.
    pub fn send_ticker_count(&self) -> i64 {
        self.heartbeat().map_or(0, |hb| hb.send_count())
    }

    /// Number of receive heartbeat ticks so far. Zero usually means receive
    /// heartbeats are not enabled.
    pub fn receive_ticker_count(&self) -> i64 {
        self.heartbeat().map_or(0, |hb| hb.recv_count())
    }

    /// Whether the broker has been silent longer than the receive window.
    pub fn receive_late(&self) -> bool {
        self.heartbeat().is_some_and(|hb| hb.receive_late())
    }

    /// Move from `Initializing` to `Connected` and spawn the writer plus
    /// the negotiated heartbeat tasks.
    ///
    /// Parameters
    /// - `sink`: the transport's outbound half. Every frame queued through
    ///   [`send_frame`](Self::send_frame) and every heartbeat pulse is
    ///   written to it by the writer task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S>(&self, sink: S) -> Result<(), ConnError>
    where
        S: Sink<StompItem> + Unpin + Send + 'static,
        S::Error: fmt::Display,
    {
        let inner = &self.inner;
        // Held across the transition so a concurrent shutdown either runs
        // before it or sees the descriptor.
        let mut slot = lock(&inner.heartbeat);
        inner.transition(ConnectionState::Initializing, ConnectionState::Connected)?;
        let Some(outbound_rx) = lock(&inner.outbound_rx).take() else {
            return Err(ConnError::ChannelClosed("outbound"));
        };

        let (send, recv) = inner.negotiated;
        let hb = HeartbeatDescriptor::new(send, recv).map(Arc::new);
        tokio::spawn(run_writer(
            sink,
            outbound_rx,
            inner.writer_stop.clone(),
            hb.clone(),
            Arc::downgrade(inner),
        ));
        if let Some(hb) = &hb {
            hb.spawn_sender(inner.outbound_tx.clone());
            hb.spawn_receiver();
        }
        *slot = hb;
        drop(slot);

        tracing::debug!(session = %inner.session, protocol = %inner.protocol, "connection started");
        self.log(format_args!(
            "connected: protocol={} send_hb_ms={} recv_hb_ms={}",
            inner.protocol,
            self.send_ticker_interval(),
            self.receive_ticker_interval()
        ));
        Ok(())
    }

    /// Spawn a reader over the transport's inbound half.
    ///
    /// Items are routed through [`deliver`](Self::deliver). An error item,
    /// end-of-stream, or the receive heartbeat going late
    /// ([`ReadError::HeartbeatTimeout`]) is fanned out through
    /// [`handle_read_error`](Self::handle_read_error), after which the
    /// connection is shut down.
    pub fn attach_reader<R>(&self, stream: R) -> Result<JoinHandle<()>, ConnError>
    where
        R: Stream<Item = Result<StompItem, ReadError>> + Unpin + Send + 'static,
    {
        if !self.connected() {
            return Err(ConnError::NotConnected);
        }
        let conn = self.clone();
        Ok(tokio::spawn(async move { conn.run_reader(stream).await }))
    }

    async fn run_reader<R>(self, mut stream: R)
    where
        R: Stream<Item = Result<StompItem, ReadError>> + Unpin,
    {
        let stop = self.inner.reader_stop.clone();
        let hb = self.heartbeat().filter(|hb| hb.recv().is_some());
        loop {
            let item = tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                _ = heartbeat_late(hb.as_deref()) => {
                    let Some(hb) = hb.as_deref().filter(|hb| hb.receive_late()) else {
                        continue;
                    };
                    let quiet = u64::try_from(hb.receive_quiet().as_millis()).unwrap_or(u64::MAX);
                    Some(Err(ReadError::HeartbeatTimeout(quiet)))
                }
                item = stream.next() => item,
            };
            match item {
                Some(Ok(item)) => self.deliver(item).await,
                Some(Err(e)) => {
                    self.handle_read_error(MessageData::Error(e)).await;
                    break;
                }
                None => {
                    self.handle_read_error(MessageData::Error(ReadError::EndOfStream))
                        .await;
                    break;
                }
            }
        }
        self.shutdown();
    }

    /// Route one inbound item on the normal path.
    ///
    /// Any item counts as receive-side liveness. A MESSAGE frame whose
    /// `subscription` header names a registered subscription goes to that
    /// subscription's queue; everything else goes to the general queue.
    /// Waits while the target queue is full.
    pub async fn deliver(&self, item: StompItem) {
        if let Some(hb) = self.heartbeat() {
            hb.touch_received();
        }
        let frame = match item {
            StompItem::Heartbeat => return,
            StompItem::Frame(f) => f,
        };
        let sub_id = frame.subscription().map(str::to_owned);
        let md = MessageData::Message(frame);
        if let Some(id) = sub_id {
            if self.inner.subscriptions.deliver(&id, md.clone()).await {
                return;
            }
            tracing::debug!(subscription = %id, "no live subscription, using general queue");
        }
        let _ = self.inner.input_tx.send(md).await;
    }

    /// Notify every interested party of a read failure.
    ///
    /// The envelope goes to the general queue first, then to every
    /// subscription registered at the moment the registry lock is taken.
    /// Each queue receives it exactly once. A full queue makes this wait;
    /// there is no retry or timeout.
    pub async fn handle_read_error(&self, md: MessageData) {
        if let Some(e) = md.error() {
            self.log(format_args!("read error: {}", e));
        }
        let _ = self.inner.input_tx.send(md.clone()).await;
        let delivered = self.inner.subscriptions.fan_out(&md).await;
        tracing::debug!(session = %self.inner.session, subscribers = delivered, "read error fanned out");
    }

    /// Stop all background activity and mark the connection disconnected.
    ///
    /// Order: enabled heartbeat directions, then the writer, then the
    /// reader, then the state flips to `Disconnected`. Signals are
    /// fire-and-forget; tasks may still be winding down when this returns.
    ///
    /// Idempotent: only the first call out of `Connected` does anything. A
    /// connection that was never started goes straight to `Disconnected`.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        loop {
            match inner.state() {
                ConnectionState::Connected => {
                    if inner
                        .transition(ConnectionState::Connected, ConnectionState::ShuttingDown)
                        .is_ok()
                    {
                        break;
                    }
                }
                ConnectionState::Initializing => {
                    if inner
                        .transition(ConnectionState::Initializing, ConnectionState::Disconnected)
                        .is_ok()
                    {
                        inner.writer_stop.cancel();
                        inner.reader_stop.cancel();
                        return;
                    }
                }
                ConnectionState::ShuttingDown | ConnectionState::Disconnected => return,
            }
        }

        if let Some(hb) = lock(&inner.heartbeat).take() {
            hb.stop();
        }
        inner.writer_stop.cancel();
        inner.reader_stop.cancel();
        inner
            .state
            .store(ConnectionState::Disconnected as u8, Ordering::Release);

        tracing::debug!(session = %inner.session, "connection shut down");
        self.log(format_args!("shutdown complete"));
    }

    /// Queue a frame for the writer task.
    pub async fn send_frame(&self, frame: Frame) -> Result<(), ConnError> {
        if !self.connected() {
            return Err(ConnError::NotConnected);
        }
        self.inner
            .outbound_tx
            .send(StompItem::Frame(frame))
            .await
            .map_err(|_| ConnError::ChannelClosed("outbound"))
    }

    /// Receive the next envelope from the general input queue.
    pub async fn next_message(&self) -> Option<MessageData> {
        let mut rx = self.inner.input_rx.lock().await;
        rx.recv().await
    }

    /// Non-blocking variant of [`next_message`](Self::next_message).
    ///
    /// Returns `None` while another handle is parked in `next_message`,
    /// even if envelopes are queued: that caller holds the queue and will
    /// receive them.
    pub fn try_next_message(&self) -> Option<MessageData> {
        let mut rx = self.inner.input_rx.try_lock().ok()?;
        rx.try_recv().ok()
    }

    /// Register a subscription queue under `id`.
    ///
    /// Building and sending the SUBSCRIBE frame is up to the caller.
    pub async fn subscribe(&self, id: &str) -> Result<Subscription, ConnError> {
        let rx = self.inner.subscriptions.insert(id).await?;
        Ok(Subscription::new(id.to_string(), rx, self.clone()))
    }

    /// Remove the subscription queue registered under `id`.
    pub async fn unsubscribe(&self, id: &str) -> Result<(), ConnError> {
        self.inner.subscriptions.remove(id).await
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.inner.subscriptions
    }
}

async fn run_writer<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<StompItem>,
    stop: CancellationToken,
    hb: Option<Arc<HeartbeatDescriptor>>,
    conn: Weak<Inner>,
) where
    S: Sink<StompItem> + Unpin,
    S::Error: fmt::Display,
{
    let mut in_flight = false;
    loop {
        let item = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            item = rx.recv() => item,
        };
        let Some(item) = item else { break };
        let sent = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                in_flight = true;
                break;
            }
            sent = sink.send(item) => sent,
        };
        if let Err(e) = sent {
            tracing::warn!(error = %e, "write failed, shutting down connection");
            if let Some(inner) = conn.upgrade() {
                Connection { inner }.shutdown();
            }
            break;
        }
        if let Some(hb) = &hb {
            hb.touch_sent();
        }
    }
    if in_flight {
        // a sink stuck mid-write will not close either
        tracing::debug!("dropping transport sink with a write in flight");
    } else {
        match tokio::time::timeout(SINK_CLOSE_GRACE, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "closing transport sink failed"),
            Err(_) => tracing::debug!("transport sink did not close in time"),
        }
    }
    tracing::debug!("writer task stopped");
}

async fn heartbeat_late(hb: Option<&HeartbeatDescriptor>) {
    match hb {
        Some(hb) => hb.late().await,
        None => std::future::pending().await,
    }
}
