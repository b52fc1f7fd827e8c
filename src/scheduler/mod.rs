// Scheduler module - real-time step sequencer

pub mod interval;
pub mod playback;

pub use interval::{SchedulerError, is_swung, nominal_interval, step_interval};
pub use playback::{PlaybackScheduler, PlaybackState, StepSequence};
