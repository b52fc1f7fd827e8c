// Shared helpers for integration tests

#![allow(dead_code)]

use lampi_looper::config::BusConfig;
use lampi_looper::output::{LedColor, LedDriver, OutputSink};
use lampi_looper::{Clock, LocalBroker, MonotonicClock, OriginId, StepValue, SyncBus, Transport};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or `timeout` passes
pub fn eventually<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

pub fn fast_bus_config() -> BusConfig {
    BusConfig {
        poll_interval_ms: 1,
        ..BusConfig::default()
    }
}

/// Bus on `transport` with a real clock, already connected
pub fn connected_bus(transport: Arc<dyn Transport>, role: &str, config: BusConfig) -> SyncBus {
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let bus = SyncBus::start(transport, OriginId::generate(role), config, clock);
    assert!(bus.wait_connected(TIMEOUT), "{} never connected", role);
    bus
}

pub fn local_bus(broker: &LocalBroker, role: &str) -> SyncBus {
    connected_bus(Arc::new(broker.clone()), role, fast_bus_config())
}

/// Sink remembering every dispatched step and clear
#[derive(Default)]
pub struct RecordingSink {
    steps: Mutex<Vec<StepValue>>,
    clears: AtomicUsize,
}

impl RecordingSink {
    pub fn steps(&self) -> Vec<StepValue> {
        self.steps.lock().unwrap().clone()
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl OutputSink for RecordingSink {
    fn dispatch(&self, step: StepValue) {
        self.steps.lock().unwrap().push(step);
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// LED driver remembering every color it was given
#[derive(Default, Clone)]
pub struct RecordingLed {
    colors: Arc<Mutex<Vec<LedColor>>>,
}

impl RecordingLed {
    pub fn colors(&self) -> Vec<LedColor> {
        self.colors.lock().unwrap().clone()
    }
}

impl LedDriver for RecordingLed {
    fn set_color(&self, color: LedColor) {
        self.colors.lock().unwrap().push(color);
    }
}
