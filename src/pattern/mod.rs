// Pattern module - Shared musical state, its wire snapshot, and the local store

pub mod model;
pub mod snapshot;
pub mod step;
pub mod store;
pub mod timeline;

pub use model::{Pattern, PatternError};
pub use snapshot::{OriginId, Snapshot, SnapshotError};
pub use step::{InvalidStepValue, StepValue};
pub use store::PatternStore;
pub use timeline::{DEFAULT_BPM, MAX_BPM, Tempo, TempoOutOfRange, TimeSignature};
