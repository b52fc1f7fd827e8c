// Status du lien avec le broker

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    /// Reconnect budget exhausted; the session has given up
    Failed = 3,
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkStatus::Connected)
    }
}

impl From<u8> for LinkStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => LinkStatus::Disconnected,
            1 => LinkStatus::Connecting,
            2 => LinkStatus::Connected,
            3 => LinkStatus::Failed,
            _ => LinkStatus::Disconnected,
        }
    }
}

/// Atomic wrapper pour partager le status entre threads
#[derive(Clone)]
pub struct AtomicLinkStatus {
    inner: Arc<AtomicU8>,
}

impl AtomicLinkStatus {
    pub fn new(status: LinkStatus) -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(status as u8)),
        }
    }

    pub fn get(&self) -> LinkStatus {
        LinkStatus::from(self.inner.load(Ordering::Acquire))
    }

    pub fn set(&self, status: LinkStatus) {
        self.inner.store(status as u8, Ordering::Release);
    }
}

impl Default for AtomicLinkStatus {
    fn default() -> Self {
        Self::new(LinkStatus::Disconnected)
    }
}
