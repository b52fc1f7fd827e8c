// Light service - drives the local LED from lighting-topic commands

use super::dispatch::LedColor;
use super::sink::LedDriver;
use crate::bus::SyncBus;
use std::sync::Arc;

/// Owner of the physical LED
///
/// Starts dark, then applies each color received on the lighting topic.
pub struct LightService<L> {
    led: Arc<L>,
}

impl<L: LedDriver + 'static> LightService<L> {
    /// Turn the LED off and start following `bus`
    pub fn start(bus: &SyncBus, led: L) -> Self {
        let led = Arc::new(led);
        led.set_color(LedColor::OFF);

        let target = Arc::clone(&led);
        bus.subscribe_lights(move |color| target.set_color(color.clamped()));

        tracing::info!(origin = %bus.origin(), "light service listening");
        Self { led }
    }

    pub fn led(&self) -> &L {
        &self.led
    }
}
