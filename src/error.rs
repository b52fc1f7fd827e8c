// Top-level error type for binaries and callers that span modules

use crate::bus::BusError;
use crate::config::ConfigError;
use crate::pattern::PatternError;
use crate::persistence::PersistenceError;
use crate::scheduler::SchedulerError;

#[derive(Debug, thiserror::Error)]
pub enum LampError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LampError>;
