// Lighting over the bus - LED colors published for a remote light service

use super::dispatch::LedColor;
use super::sink::LedDriver;
use crate::bus::SyncBus;
use std::sync::Arc;

/// LED driver that forwards every color to the lighting topic
///
/// Used by the playback driver when the LED hardware belongs to another
/// process. Publishing only queues the frame, so the timing thread never
/// waits on the broker.
#[derive(Clone)]
pub struct BusLightDriver {
    bus: Arc<SyncBus>,
}

impl BusLightDriver {
    pub fn new(bus: Arc<SyncBus>) -> Self {
        Self { bus }
    }
}

impl LedDriver for BusLightDriver {
    fn set_color(&self, color: LedColor) {
        self.bus.publish_light(color.clamped());
    }
}
