//! Heartbeat configuration, negotiation and the per-connection descriptor.
//!
//! Negotiation happens in milliseconds (the unit of the `heart-beat` header)
//! but the descriptor keeps full `Duration` resolution. Accessors report
//! milliseconds by floor division, so an interval below 1 ms reads as 0,
//! exactly like a disabled direction.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::frame::StompItem;

const NANOS_PER_MILLI: u128 = 1_000_000;

/// Client heartbeat configuration, rendered as the `heart-beat` header.
///
/// `send_ms` is how often the client offers to send heartbeats and
/// `receive_ms` how often it wants to receive them. Zero disables that
/// direction on the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub send_ms: u64,
    pub receive_ms: u64,
}

impl Heartbeat {
    pub fn new(send_ms: u64, receive_ms: u64) -> Self {
        Self {
            send_ms,
            receive_ms,
        }
    }

    /// No heartbeats in either direction ("0,0").
    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Same interval in both directions, truncated to whole milliseconds.
    /// Intervals beyond `u64::MAX` ms saturate.
    pub fn from_duration(interval: Duration) -> Self {
        let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        Self::new(ms, ms)
    }

    pub fn is_disabled(&self) -> bool {
        self.send_ms == 0 && self.receive_ms == 0
    }

    /// Negotiate against the broker's `heart-beat` header value.
    ///
    /// Returns `(outgoing, incoming)`; see [`negotiate_heartbeats`].
    pub fn negotiate(&self, server_header: &str) -> (Option<Duration>, Option<Duration>) {
        let (sx, sy) = parse_heartbeat_header(server_header);
        negotiate_heartbeats(self.send_ms, self.receive_ms, sx, sy)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new(10_000, 10_000)
    }
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.send_ms, self.receive_ms)
    }
}

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Returns `(cx, cy)` in milliseconds. Missing or invalid fields default
/// to `0`.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let mut next = || {
        parts
            .next()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0)
    };
    let cx = next();
    let cy = next();
    (cx, cy)
}

/// Negotiate heartbeat intervals between client and server.
///
/// Each direction takes the maximum of the matching client and server
/// values; a negotiated `0` disables the direction.
///
/// Returns `(outgoing, incoming)`.
pub fn negotiate_heartbeats(
    client_out: u64,
    client_in: u64,
    server_out: u64,
    server_in: u64,
) -> (Option<Duration>, Option<Duration>) {
    let enabled = |ms: u64| (ms != 0).then(|| Duration::from_millis(ms));
    (
        enabled(client_out.max(server_in)),
        enabled(client_in.max(server_out)),
    )
}

/// One enabled heartbeat direction: interval, tick counter and stop token.
#[derive(Debug)]
pub struct Direction {
    interval: Duration,
    count: AtomicI64,
    stop: CancellationToken,
}

impl Direction {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            count: AtomicI64::new(0),
            stop: CancellationToken::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Interval in whole milliseconds (floor), saturating at `i64::MAX`.
    pub fn interval_ms(&self) -> i64 {
        i64::try_from(self.interval.as_nanos() / NANOS_PER_MILLI).unwrap_or(i64::MAX)
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }

    fn tick(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Signal the direction's task to exit. Safe to call repeatedly.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

/// Negotiated heartbeat state for one connection.
///
/// Exists only while at least one direction is enabled. Counters and
/// timestamps are atomics so accessors can read them while the heartbeat
/// tasks run; the two directions are read independently.
#[derive(Debug)]
pub struct HeartbeatDescriptor {
    send: Option<Direction>,
    recv: Option<Direction>,
    epoch: Instant,
    last_sent: AtomicU64,
    last_received: AtomicU64,
    late: AtomicBool,
    late_signal: Notify,
}

impl HeartbeatDescriptor {
    /// Build a descriptor from negotiated intervals.
    ///
    /// Returns `None` when both directions are disabled. A zero `Duration`
    /// counts as disabled.
    pub fn new(send: Option<Duration>, recv: Option<Duration>) -> Option<Self> {
        let send = send.filter(|d| !d.is_zero()).map(Direction::new);
        let recv = recv.filter(|d| !d.is_zero()).map(Direction::new);
        if send.is_none() && recv.is_none() {
            return None;
        }
        Some(Self {
            send,
            recv,
            epoch: Instant::now(),
            last_sent: AtomicU64::new(0),
            last_received: AtomicU64::new(0),
            late: AtomicBool::new(false),
            late_signal: Notify::new(),
        })
    }

    pub fn send(&self) -> Option<&Direction> {
        self.send.as_ref()
    }

    pub fn recv(&self) -> Option<&Direction> {
        self.recv.as_ref()
    }

    pub fn send_interval_ms(&self) -> i64 {
        self.send.as_ref().map_or(0, Direction::interval_ms)
    }

    pub fn recv_interval_ms(&self) -> i64 {
        self.recv.as_ref().map_or(0, Direction::interval_ms)
    }

    pub fn send_count(&self) -> i64 {
        self.send.as_ref().map_or(0, Direction::count)
    }

    pub fn recv_count(&self) -> i64 {
        self.recv.as_ref().map_or(0, Direction::count)
    }

    /// Whether the receive side has gone quiet for longer than tolerated.
    pub fn receive_late(&self) -> bool {
        self.late.load(Ordering::Acquire)
    }

    /// Time since the last inbound item (or since the descriptor was built).
    pub fn receive_quiet(&self) -> Duration {
        self.since(&self.last_received)
    }

    /// Resolve once the receive side is flagged late.
    ///
    /// A flag raised while nobody waits is remembered for the next waiter,
    /// so callers should re-check [`receive_late`](Self::receive_late): the
    /// flag may have cleared in between.
    pub async fn late(&self) {
        self.late_signal.notified().await;
    }

    /// Record that the writer put something on the wire.
    pub fn touch_sent(&self) {
        self.last_sent.store(self.now_nanos(), Ordering::Release);
    }

    /// Record inbound traffic (frame or heartbeat pulse).
    pub fn touch_received(&self) {
        self.last_received.store(self.now_nanos(), Ordering::Release);
        self.late.store(false, Ordering::Release);
    }

    /// Signal both enabled directions to stop.
    pub fn stop(&self) {
        if let Some(d) = &self.send {
            d.stop();
        }
        if let Some(d) = &self.recv {
            d.stop();
        }
    }

    fn now_nanos(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn since(&self, mark: &AtomicU64) -> Duration {
        let now = self.now_nanos();
        Duration::from_nanos(now.saturating_sub(mark.load(Ordering::Acquire)))
    }

    /// Spawn the send-heartbeat task if the send direction is enabled.
    ///
    /// Every tick bumps the send counter; a pulse is queued for the writer
    /// only when nothing was written during the last interval.
    pub fn spawn_sender(
        self: &Arc<Self>,
        outbound: mpsc::Sender<StompItem>,
    ) -> Option<JoinHandle<()>> {
        let interval = self.send.as_ref()?.interval;
        let hb = Arc::clone(self);
        Some(tokio::spawn(async move {
            let Some(dir) = hb.send.as_ref() else { return };
            let Some(mut ticker) = start_ticker(interval) else {
                dir.stop.cancelled().await;
                return;
            };
            tracing::debug!(interval_ms = dir.interval_ms(), "send heartbeat task started");
            loop {
                tokio::select! {
                    biased;
                    _ = dir.stop.cancelled() => break,
                    _ = ticker.tick() => {
                        dir.tick();
                        if hb.since(&hb.last_sent) < interval {
                            continue;
                        }
                        match outbound.try_send(StompItem::Heartbeat) {
                            Ok(()) => {}
                            // a backlog means traffic is already flowing
                            Err(TrySendError::Full(_)) => {}
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
            tracing::debug!(ticks = dir.count(), "send heartbeat task stopped");
        }))
    }

    /// Spawn the receive-heartbeat task if the receive direction is enabled.
    ///
    /// Every tick bumps the receive counter. When nothing has arrived for
    /// more than twice the interval the descriptor is flagged late; the flag
    /// clears on the next inbound item. Raising the flag wakes one
    /// [`late`](Self::late) waiter.
    pub fn spawn_receiver(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let interval = self.recv.as_ref()?.interval;
        let hb = Arc::clone(self);
        Some(tokio::spawn(async move {
            let Some(dir) = hb.recv.as_ref() else { return };
            let Some(mut ticker) = start_ticker(interval) else {
                dir.stop.cancelled().await;
                return;
            };
            tracing::debug!(interval_ms = dir.interval_ms(), "receive heartbeat task started");
            loop {
                tokio::select! {
                    biased;
                    _ = dir.stop.cancelled() => break,
                    _ = ticker.tick() => {
                        dir.tick();
                        let quiet = hb.receive_quiet();
                        let overdue = quiet > interval.saturating_mul(2);
                        if overdue && !hb.late.swap(true, Ordering::AcqRel) {
                            tracing::warn!(
                                quiet_ms = u64::try_from(quiet.as_millis()).unwrap_or(u64::MAX),
                                interval_ms = dir.interval_ms(),
                                "receive heartbeat late"
                            );
                            hb.late_signal.notify_one();
                        }
                    }
                }
            }
            tracing::debug!(ticks = dir.count(), "receive heartbeat task stopped");
        }))
    }
}

/// Ticker first firing one `interval` from now. `None` when that instant
/// is not representable, in which case the direction never ticks.
fn start_ticker(interval: Duration) -> Option<time::Interval> {
    let start = Instant::now().checked_add(interval)?;
    let mut ticker = time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}
