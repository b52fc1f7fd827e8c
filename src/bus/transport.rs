// Transport abstraction - how frames reach a broker and come back

use std::time::Duration;

/// One message on a topic
///
/// `retain` asks the broker to keep this frame as the topic's last known
/// value and replay it to every later subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl Frame {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain,
        }
    }
}

/// Bus error types
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("connection to broker lost")]
    Disconnected,

    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A live link to a broker
///
/// Owned by a single session thread; implementations need not be `Sync`.
pub trait Connection: Send {
    /// Start receiving frames for `topic`; the broker replays its retained
    /// frame, if any, right after.
    fn subscribe(&mut self, topic: &str) -> Result<(), BusError>;

    /// Hand one frame to the broker
    fn send(&mut self, frame: &Frame) -> Result<(), BusError>;

    /// Wait up to `timeout` for the next inbound frame
    ///
    /// `Ok(None)` on timeout, `Err(BusError::Disconnected)` once the link is
    /// gone.
    fn poll(&mut self, timeout: Duration) -> Result<Option<Frame>, BusError>;
}

/// Factory for broker connections, called again on every reconnect
pub trait Transport: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Connection>, BusError>;

    /// Human readable endpoint for logs
    fn describe(&self) -> String;
}
