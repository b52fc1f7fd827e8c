// Persistence module - durable record and the daemon that maintains it

pub mod daemon;
pub mod durable;

pub use daemon::PersistenceDaemon;
pub use durable::{DurableRecord, DurableStore, PersistenceError};
