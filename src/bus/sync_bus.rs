// Synchronization bus - snapshot publish/subscribe with loopback suppression
//
// One session thread per bus owns the broker connection. It drains the
// outbound ring buffer, polls for inbound frames, and reconnects with backoff
// when the link drops. Callers never touch the connection: `publish_*` only
// pushes onto the ring buffer, so it cannot block on network I/O.

use super::transport::{BusError, Connection, Frame, Transport};
use crate::clock::{Clock, StopSignal, WaitOutcome};
use crate::config::BusConfig;
use crate::connection::{AtomicLinkStatus, LinkStatus, ReconnectionStrategy};
use crate::messaging::{
    FrameConsumer, FrameProducer, Notification, NotificationCategory, SharedNotifier,
    create_frame_channel, notify,
};
use crate::output::LedColor;
use crate::pattern::{OriginId, Snapshot};
use ringbuf::traits::{Consumer, Producer};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

type SnapshotHandler = Arc<dyn Fn(&Snapshot) + Send + Sync>;
type LightHandler = Arc<dyn Fn(LedColor) + Send + Sync>;

/// State shared between the bus handle and its session thread
struct BusShared {
    origin: OriginId,
    config: BusConfig,
    status: AtomicLinkStatus,
    stop: StopSignal,
    snapshot_handlers: Mutex<Vec<SnapshotHandler>>,
    // Held while snapshots are handed to handlers, so a replay never
    // interleaves with a live delivery
    delivery: Mutex<()>,
    light_handlers: Mutex<Vec<LightHandler>>,
    // Last accepted inbound snapshot, replayed to late handlers
    last_snapshot: Mutex<Option<Snapshot>>,
    snapshot_arrived: Condvar,
    fatal: Mutex<Option<String>>,
    notifier: Option<SharedNotifier>,
}

/// Bus participant for one process
///
/// Every participant publishes its own mutations and receives everyone
/// else's. Snapshots carrying this bus's origin are dropped on arrival.
pub struct SyncBus {
    shared: Arc<BusShared>,
    outbound: Mutex<FrameProducer>,
    session: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SyncBus {
    /// Start a bus session against `transport`
    pub fn start(
        transport: Arc<dyn Transport>,
        origin: OriginId,
        config: BusConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::start_with_notifier(transport, origin, config, clock, None)
    }

    /// Same as [`SyncBus::start`], reporting link failures on `notifier`
    pub fn start_with_notifier(
        transport: Arc<dyn Transport>,
        origin: OriginId,
        config: BusConfig,
        clock: Arc<dyn Clock>,
        notifier: Option<SharedNotifier>,
    ) -> Self {
        let (producer, consumer) = create_frame_channel(config.outbound_capacity.max(1));

        let shared = Arc::new(BusShared {
            origin,
            config,
            status: AtomicLinkStatus::new(LinkStatus::Disconnected),
            stop: StopSignal::new(),
            snapshot_handlers: Mutex::new(Vec::new()),
            delivery: Mutex::new(()),
            light_handlers: Mutex::new(Vec::new()),
            last_snapshot: Mutex::new(None),
            snapshot_arrived: Condvar::new(),
            fatal: Mutex::new(None),
            notifier,
        });

        let session = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("lampi-bus-{}", shared.origin))
                .spawn(move || run_session(&shared, transport.as_ref(), clock.as_ref(), consumer))
        };
        let session = match session {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn bus session");
                shared.fail(format!("failed to spawn bus session: {}", e));
                None
            }
        };

        Self {
            shared,
            outbound: Mutex::new(producer),
            session: Mutex::new(session),
        }
    }

    pub fn origin(&self) -> &OriginId {
        &self.shared.origin
    }

    pub fn status(&self) -> LinkStatus {
        self.shared.status.get()
    }

    /// The error that made the session give up, if it has
    pub fn fatal_error(&self) -> Option<BusError> {
        lock(&self.shared.fatal)
            .clone()
            .map(BusError::TransportUnavailable)
    }

    /// Queue a snapshot for every other participant (retained)
    ///
    /// Fire-and-forget: returns as soon as the frame is queued.
    pub fn publish_snapshot(&self, snapshot: &Snapshot) {
        match serde_json::to_string(snapshot) {
            Ok(payload) => self.enqueue(Frame::new(
                self.shared.config.state_topic.as_str(),
                payload,
                true,
            )),
            Err(e) => tracing::error!(error = %e, "failed to encode snapshot"),
        }
    }

    /// Queue an LED color on the lighting topic (not retained)
    pub fn publish_light(&self, color: LedColor) {
        match serde_json::to_string(&color) {
            Ok(payload) => self.enqueue(Frame::new(
                self.shared.config.light_topic.as_str(),
                payload,
                false,
            )),
            Err(e) => tracing::error!(error = %e, "failed to encode light command"),
        }
    }

    /// Register a handler for snapshots from other writers
    ///
    /// Handlers run on the session thread in registration order. A handler
    /// registered after a snapshot was already received gets it immediately,
    /// before any newer one. Must not be called from inside a snapshot handler.
    pub fn subscribe_snapshots<F>(&self, handler: F)
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let handler: SnapshotHandler = Arc::new(handler);
        let _delivery = lock(&self.shared.delivery);
        lock(&self.shared.snapshot_handlers).push(Arc::clone(&handler));

        let cached = lock(&self.shared.last_snapshot).clone();
        if let Some(snapshot) = cached {
            handler(&snapshot);
        }
    }

    /// Register a handler for lighting commands
    pub fn subscribe_lights<F>(&self, handler: F)
    where
        F: Fn(LedColor) + Send + Sync + 'static,
    {
        lock(&self.shared.light_handlers).push(Arc::new(handler));
    }

    /// Most recent snapshot received from another writer
    pub fn last_snapshot(&self) -> Option<Snapshot> {
        lock(&self.shared.last_snapshot).clone()
    }

    /// Block until a snapshot from another writer has been received
    pub fn wait_for_snapshot(&self, timeout: Duration) -> Option<Snapshot> {
        let guard = lock(&self.shared.last_snapshot);
        let (guard, _) = self
            .shared
            .snapshot_arrived
            .wait_timeout_while(guard, timeout, |last| last.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Block until the link is up or `timeout` passes
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.status() {
                LinkStatus::Connected => return true,
                LinkStatus::Failed => return false,
                _ if Instant::now() >= deadline => return false,
                _ => thread::sleep(Duration::from_millis(2)),
            }
        }
    }

    /// Stop the session and close the connection
    ///
    /// Frames still queued are flushed first if the link is up.
    pub fn shutdown(&self) {
        self.shared.stop.raise();
        if let Some(handle) = lock(&self.session).take() {
            if handle.join().is_err() {
                tracing::error!("bus session panicked");
            }
        }
    }

    fn enqueue(&self, frame: Frame) {
        let mut outbound = lock(&self.outbound);
        if let Err(frame) = outbound.try_push(frame) {
            tracing::warn!(topic = %frame.topic, "outbound queue full, dropping frame");
        }
    }
}

impl Drop for SyncBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl BusShared {
    // Status goes last so anyone observing `Failed` also sees the reason
    fn fail(&self, reason: String) {
        *lock(&self.fatal) = Some(reason.clone());
        notify(
            self.notifier.as_ref(),
            Notification::error(NotificationCategory::Bus, reason),
        );
        self.status.set(LinkStatus::Failed);
    }

    fn handle_inbound(&self, frame: Frame) {
        if frame.topic == self.config.state_topic {
            self.handle_snapshot(&frame.payload);
        } else if frame.topic == self.config.light_topic {
            match serde_json::from_str::<LedColor>(&frame.payload) {
                Ok(color) => {
                    let handlers = lock(&self.light_handlers).clone();
                    for handler in handlers {
                        handler(color);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "malformed light command dropped"),
            }
        } else {
            tracing::trace!(topic = %frame.topic, "frame on unknown topic ignored");
        }
    }

    fn handle_snapshot(&self, payload: &str) {
        let snapshot = match decode_snapshot(payload) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "dropping inbound snapshot");
                return;
            }
        };

        if snapshot.origin_id == self.origin {
            tracing::trace!("loopback snapshot suppressed");
            return;
        }

        let _delivery = lock(&self.delivery);
        *lock(&self.last_snapshot) = Some(snapshot.clone());
        self.snapshot_arrived.notify_all();

        let handlers = lock(&self.snapshot_handlers).clone();
        for handler in handlers {
            handler(&snapshot);
        }
    }
}

/// Parse and shape-check a state payload
pub fn decode_snapshot(payload: &str) -> Result<Snapshot, BusError> {
    let snapshot: Snapshot =
        serde_json::from_str(payload).map_err(|e| BusError::MalformedSnapshot(e.to_string()))?;
    snapshot
        .validate()
        .map_err(|e| BusError::MalformedSnapshot(e.to_string()))?;
    Ok(snapshot)
}

fn run_session(
    shared: &BusShared,
    transport: &dyn Transport,
    clock: &dyn Clock,
    mut outbound: FrameConsumer,
) {
    let mut strategy = ReconnectionStrategy::new(shared.config.reconnect);
    // Frame popped from the queue but not yet accepted by the broker
    let mut unsent: Option<Frame> = None;

    while !shared.stop.is_raised() {
        shared.status.set(LinkStatus::Connecting);

        match transport.connect() {
            Ok(mut connection) => {
                strategy.reset();
                tracing::info!(broker = %transport.describe(), origin = %shared.origin, "bus connected");

                let result = serve_connection(shared, connection.as_mut(), &mut outbound, &mut unsent);
                shared.status.set(LinkStatus::Disconnected);
                match result {
                    Ok(()) => break,
                    Err(e) => tracing::warn!(error = %e, "bus link lost, reconnecting"),
                }
            }
            Err(e) => {
                shared.status.set(LinkStatus::Disconnected);
                let Some(delay) = strategy.next_delay() else {
                    let reason = format!(
                        "{} unreachable after {:?}: {}",
                        transport.describe(),
                        strategy.elapsed(),
                        e
                    );
                    tracing::error!(%reason, "giving up on broker");
                    shared.fail(reason);
                    return;
                };

                tracing::warn!(
                    error = %e,
                    attempt = strategy.current_attempt(),
                    ?delay,
                    "broker unreachable, retrying"
                );
                if clock.wait_for(delay, &shared.stop) == WaitOutcome::Stopped {
                    break;
                }
            }
        }
    }

    shared.status.set(LinkStatus::Disconnected);
}

/// Pump one live connection until stopped (`Ok`) or the link drops (`Err`)
fn serve_connection(
    shared: &BusShared,
    connection: &mut dyn Connection,
    outbound: &mut FrameConsumer,
    unsent: &mut Option<Frame>,
) -> Result<(), BusError> {
    // Subscribing again after a reconnect makes the broker replay retained state
    connection.subscribe(&shared.config.state_topic)?;
    connection.subscribe(&shared.config.light_topic)?;
    shared.status.set(LinkStatus::Connected);

    let poll_interval = Duration::from_millis(shared.config.poll_interval_ms.max(1));

    loop {
        flush_outbound(connection, outbound, unsent)?;

        if shared.stop.is_raised() {
            return Ok(());
        }

        if let Some(frame) = connection.poll(poll_interval)? {
            shared.handle_inbound(frame);
        }
    }
}

fn flush_outbound(
    connection: &mut dyn Connection,
    outbound: &mut FrameConsumer,
    unsent: &mut Option<Frame>,
) -> Result<(), BusError> {
    loop {
        let Some(frame) = unsent.take().or_else(|| outbound.try_pop()) else {
            return Ok(());
        };
        if let Err(e) = connection.send(&frame) {
            *unsent = Some(frame);
            return Err(e);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
