// In-process broker - topic routing with retained last values

use super::transport::{BusError, Connection, Frame, Transport};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct Session {
    id: u64,
    topics: HashSet<String>,
    tx: Sender<Frame>,
}

struct BrokerState {
    available: bool,
    retained: HashMap<String, Frame>,
    sessions: Vec<Session>,
    next_id: u64,
}

/// Broker living inside the current process
///
/// Routing happens under one lock, so frames from a given connection reach
/// every subscriber in the order they were sent. Cloning shares the broker.
#[derive(Clone)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                available: true,
                retained: HashMap::new(),
                sessions: Vec::new(),
                next_id: 1,
            })),
        }
    }

    /// Take the broker down or bring it back
    ///
    /// Going down drops every live session (their next poll reports
    /// `Disconnected`) and refuses new connections. Retained frames survive.
    pub fn set_available(&self, available: bool) {
        let mut state = self.lock();
        state.available = available;
        if !available {
            state.sessions.clear();
        }
    }

    pub fn is_available(&self) -> bool {
        self.lock().available
    }

    /// Retained frame for `topic`, if any
    pub fn retained(&self, topic: &str) -> Option<Frame> {
        self.lock().retained.get(topic).cloned()
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn route(&self, sender: u64, frame: &Frame) -> Result<(), BusError> {
        let mut state = self.lock();
        if !state.available || !state.sessions.iter().any(|s| s.id == sender) {
            return Err(BusError::Disconnected);
        }

        if frame.retain {
            state.retained.insert(frame.topic.clone(), frame.clone());
        }

        // A failed send means the receiving connection was dropped mid-route
        state
            .sessions
            .retain(|session| !session.topics.contains(&frame.topic) || session.tx.send(frame.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self, id: u64, topic: &str) -> Result<(), BusError> {
        let mut state = self.lock();
        let retained = state.retained.get(topic).cloned();
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(BusError::Disconnected)?;

        session.topics.insert(topic.to_string());
        if let Some(frame) = retained {
            session.tx.send(frame).map_err(|_| BusError::Disconnected)?;
        }
        Ok(())
    }

    fn disconnect(&self, id: u64) {
        self.lock().sessions.retain(|s| s.id != id);
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LocalBroker {
    fn connect(&self) -> Result<Box<dyn Connection>, BusError> {
        let mut state = self.lock();
        if !state.available {
            return Err(BusError::TransportUnavailable(
                "local broker is down".to_string(),
            ));
        }

        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = mpsc::channel();
        state.sessions.push(Session {
            id,
            topics: HashSet::new(),
            tx,
        });

        Ok(Box::new(LocalConnection {
            id,
            broker: self.clone(),
            rx,
        }))
    }

    fn describe(&self) -> String {
        "local broker".to_string()
    }
}

struct LocalConnection {
    id: u64,
    broker: LocalBroker,
    rx: Receiver<Frame>,
}

impl Connection for LocalConnection {
    fn subscribe(&mut self, topic: &str) -> Result<(), BusError> {
        self.broker.subscribe(self.id, topic)
    }

    fn send(&mut self, frame: &Frame) -> Result<(), BusError> {
        self.broker.route(self.id, frame)
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<Frame>, BusError> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BusError::Disconnected),
        }
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.broker.disconnect(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(100);

    #[test]
    fn test_routes_to_subscribers_only() {
        let broker = LocalBroker::new();
        let mut a = broker.connect().unwrap();
        let mut b = broker.connect().unwrap();
        let mut c = broker.connect().unwrap();
        b.subscribe("state").unwrap();
        c.subscribe("lights").unwrap();

        a.send(&Frame::new("state", "1", false)).unwrap();

        assert_eq!(b.poll(WAIT).unwrap().unwrap().payload, "1");
        assert_eq!(c.poll(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn test_retained_frame_replayed_on_subscribe() {
        let broker = LocalBroker::new();
        let mut publisher = broker.connect().unwrap();
        publisher.send(&Frame::new("state", "old", true)).unwrap();
        publisher.send(&Frame::new("state", "new", true)).unwrap();
        publisher.send(&Frame::new("state", "ephemeral", false)).unwrap();

        let mut late = broker.connect().unwrap();
        late.subscribe("state").unwrap();

        assert_eq!(late.poll(WAIT).unwrap().unwrap().payload, "new");
        assert_eq!(late.poll(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn test_per_publisher_order() {
        let broker = LocalBroker::new();
        let mut publisher = broker.connect().unwrap();
        let mut subscriber = broker.connect().unwrap();
        subscriber.subscribe("state").unwrap();

        for i in 0..50 {
            publisher
                .send(&Frame::new("state", i.to_string(), false))
                .unwrap();
        }

        for i in 0..50 {
            let frame = subscriber.poll(WAIT).unwrap().unwrap();
            assert_eq!(frame.payload, i.to_string());
        }
    }

    #[test]
    fn test_outage_disconnects_sessions() {
        let broker = LocalBroker::new();
        let mut conn = broker.connect().unwrap();
        conn.subscribe("state").unwrap();

        broker.set_available(false);

        assert!(matches!(conn.poll(WAIT), Err(BusError::Disconnected)));
        assert!(matches!(
            conn.send(&Frame::new("state", "x", false)),
            Err(BusError::Disconnected)
        ));
        assert!(matches!(
            broker.connect(),
            Err(BusError::TransportUnavailable(_))
        ));

        broker.set_available(true);
        assert!(broker.connect().is_ok());
    }

    #[test]
    fn test_drop_removes_session() {
        let broker = LocalBroker::new();
        let conn = broker.connect().unwrap();
        assert_eq!(broker.session_count(), 1);
        drop(conn);
        assert_eq!(broker.session_count(), 0);
    }
}
