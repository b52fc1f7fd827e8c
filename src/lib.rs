// Lampi looper - Library exports for the CLI and integration tests

pub mod bus;
pub mod clock;
pub mod config;
pub mod connection;
pub mod control;
pub mod error;
pub mod messaging;
pub mod output;
pub mod pattern;
pub mod persistence;
pub mod scheduler;

// Re-export commonly used types for convenience
pub use bus::{BusError, LocalBroker, SyncBus, TcpBroker, TcpTransport, Transport};
pub use clock::{Clock, ManualClock, MonotonicClock, StopSignal};
pub use config::LampConfig;
pub use control::LampController;
pub use error::{LampError, Result};
pub use output::{LedColor, MixerSink, OutputSink, StepOutput, Voice};
pub use pattern::{OriginId, Pattern, PatternStore, Snapshot, StepValue, Tempo, TimeSignature};
pub use persistence::{DurableRecord, DurableStore, PersistenceDaemon};
pub use scheduler::{PlaybackScheduler, PlaybackState, SchedulerError, StepSequence};
