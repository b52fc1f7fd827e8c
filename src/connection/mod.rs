// Connection supervision - backoff policy and shared link status

pub mod reconnect;
pub mod status;

pub use reconnect::{ReconnectConfig, ReconnectionStrategy};
pub use status::{AtomicLinkStatus, LinkStatus};
