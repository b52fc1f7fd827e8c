// Output module - what each played step does to the sound and the LED

pub mod bus_light;
pub mod dispatch;
pub mod light_service;
pub mod sink;

pub use bus_light::BusLightDriver;
pub use dispatch::{LedColor, StepOutput, Voice};
pub use light_service::LightService;
pub use sink::{LedDriver, MixerSink, OutputSink, SoundTrigger, TracingLed, TracingSound};
