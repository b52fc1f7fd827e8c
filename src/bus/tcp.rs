// TCP broker and client transport
//
// Wire format: one JSON object per line.
//   client → broker  {"op":"subscribe","topic":"ui_update"}
//   client → broker  {"op":"publish","topic":"ui_update","payload":"...","retain":true}
//   broker → client  {"op":"message","topic":"ui_update","payload":"..."}
//
// The broker keeps the last retained payload per topic and replays it right
// after a matching subscribe, like an MQTT broker does.

use super::transport::{BusError, Connection, Frame, Transport};
use std::collections::{HashMap, HashSet};
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WireFrame {
    Subscribe {
        topic: String,
    },
    Publish {
        topic: String,
        payload: String,
        #[serde(default)]
        retain: bool,
    },
    Message {
        topic: String,
        payload: String,
    },
}

fn encode_line(frame: &WireFrame) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

struct Client {
    topics: HashSet<String>,
    outbox: Sender<String>,
    stream: TcpStream,
}

#[derive(Default)]
struct BrokerState {
    retained: HashMap<String, String>,
    clients: HashMap<u64, Client>,
}

struct BrokerShared {
    state: Mutex<BrokerState>,
    shutdown: AtomicBool,
    next_client: AtomicU64,
}

impl BrokerShared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Broker accepting newline-delimited JSON clients over TCP
pub struct TcpBroker {
    listener: TcpListener,
    shared: Arc<BrokerShared>,
}

impl TcpBroker {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            shared: Arc::new(BrokerShared {
                state: Mutex::new(BrokerState::default()),
                shutdown: AtomicBool::new(false),
                next_client: AtomicU64::new(1),
            }),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients on the current thread until shut down
    pub fn serve(self) -> io::Result<()> {
        tracing::info!(addr = ?self.listener.local_addr()?, "broker listening");

        for stream in self.listener.incoming() {
            if self.shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            match stream {
                Ok(stream) => {
                    if let Err(e) = accept_client(&self.shared, stream) {
                        tracing::warn!(error = %e, "failed to set up client");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            }
        }

        tracing::info!("broker stopped");
        Ok(())
    }

    /// Run the accept loop on a background thread
    pub fn spawn(self) -> io::Result<TcpBrokerHandle> {
        let addr = self.local_addr()?;
        let shared = Arc::clone(&self.shared);
        let thread = thread::Builder::new()
            .name("lampi-broker".to_string())
            .spawn(move || {
                if let Err(e) = self.serve() {
                    tracing::error!(error = %e, "broker terminated");
                }
            })?;

        Ok(TcpBrokerHandle {
            addr,
            shared,
            thread: Some(thread),
        })
    }
}

/// Handle to a broker running in the background; stops it on drop
pub struct TcpBrokerHandle {
    addr: SocketAddr,
    shared: Arc<BrokerShared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl TcpBrokerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, drop every client, and wait for the accept loop
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.shared.shutdown.store(true, Ordering::Release);

        // Wake the blocking accept()
        let _ = TcpStream::connect(self.addr);
        let _ = thread.join();

        for (_, client) in self.shared.lock().clients.drain() {
            let _ = client.stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for TcpBrokerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_client(shared: &Arc<BrokerShared>, stream: TcpStream) -> io::Result<()> {
    let id = shared.next_client.fetch_add(1, Ordering::Relaxed);
    let peer = stream.peer_addr()?;
    stream.set_nodelay(true)?;

    let mut writer = stream.try_clone()?;
    let reader = stream.try_clone()?;
    let (outbox, lines) = mpsc::channel::<String>();

    shared.lock().clients.insert(
        id,
        Client {
            topics: HashSet::new(),
            outbox,
            stream,
        },
    );
    tracing::debug!(client = id, %peer, "client connected");

    // One writer per client so a slow reader never stalls routing
    thread::Builder::new()
        .name(format!("lampi-broker-tx-{}", id))
        .spawn(move || {
            for line in lines {
                if writer.write_all(line.as_bytes()).is_err() {
                    break;
                }
            }
        })?;

    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name(format!("lampi-broker-rx-{}", id))
        .spawn(move || {
            read_client(&shared, id, reader);
            shared.lock().clients.remove(&id);
            tracing::debug!(client = id, "client disconnected");
        })?;

    Ok(())
}

fn read_client(shared: &BrokerShared, id: u64, stream: TcpStream) {
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else {
            return;
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<WireFrame>(&line) {
            Ok(WireFrame::Subscribe { topic }) => subscribe_client(shared, id, topic),
            Ok(WireFrame::Publish {
                topic,
                payload,
                retain,
            }) => route(shared, topic, payload, retain),
            Ok(WireFrame::Message { .. }) => {
                tracing::warn!(client = id, "client sent a broker-only frame, ignoring");
            }
            Err(e) => tracing::warn!(client = id, error = %e, "unparseable frame, ignoring"),
        }
    }
}

fn subscribe_client(shared: &BrokerShared, id: u64, topic: String) {
    let mut state = shared.lock();
    let retained = state.retained.get(&topic).cloned();
    let Some(client) = state.clients.get_mut(&id) else {
        return;
    };

    if let Some(payload) = retained {
        let frame = WireFrame::Message {
            topic: topic.clone(),
            payload,
        };
        if let Ok(line) = encode_line(&frame) {
            let _ = client.outbox.send(line);
        }
    }
    client.topics.insert(topic);
}

fn route(shared: &BrokerShared, topic: String, payload: String, retain: bool) {
    let frame = WireFrame::Message {
        topic: topic.clone(),
        payload: payload.clone(),
    };
    let line = match encode_line(&frame) {
        Ok(line) => line,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode frame");
            return;
        }
    };

    let mut state = shared.lock();
    if retain {
        state.retained.insert(topic.clone(), payload);
    }
    for client in state.clients.values().filter(|c| c.topics.contains(&topic)) {
        let _ = client.outbox.send(line.clone());
    }
}

/// Client side of the TCP broker protocol
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: String,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Transport for TcpTransport {
    fn connect(&self) -> Result<Box<dyn Connection>, BusError> {
        let unavailable = |e: io::Error| BusError::TransportUnavailable(format!("{}: {}", self.addr, e));

        let addrs = self.addr.to_socket_addrs().map_err(unavailable)?;
        let mut last_error = io::Error::new(ErrorKind::NotFound, "address resolved to nothing");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    let reader = BufReader::new(stream.try_clone()?);
                    return Ok(Box::new(TcpConnection {
                        reader,
                        writer: stream,
                        pending: Vec::new(),
                    }));
                }
                Err(e) => last_error = e,
            }
        }
        Err(unavailable(last_error))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

struct TcpConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    // Partial line kept across timed-out reads, as raw bytes so a timeout
    // inside a multi-byte character loses nothing
    pending: Vec<u8>,
}

impl TcpConnection {
    fn write_frame(&mut self, frame: &WireFrame) -> Result<(), BusError> {
        let line = encode_line(frame)?;
        self.writer
            .write_all(line.as_bytes())
            .map_err(|_| BusError::Disconnected)
    }
}

impl Connection for TcpConnection {
    fn subscribe(&mut self, topic: &str) -> Result<(), BusError> {
        self.write_frame(&WireFrame::Subscribe {
            topic: topic.to_string(),
        })
    }

    fn send(&mut self, frame: &Frame) -> Result<(), BusError> {
        self.write_frame(&WireFrame::Publish {
            topic: frame.topic.clone(),
            payload: frame.payload.clone(),
            retain: frame.retain,
        })
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<Frame>, BusError> {
        // A zero timeout would mean "block forever"
        let timeout = timeout.max(Duration::from_millis(1));
        self.reader.get_ref().set_read_timeout(Some(timeout))?;

        loop {
            match self.reader.read_until(b'\n', &mut self.pending) {
                Ok(0) => return Err(BusError::Disconnected),
                Ok(_) if self.pending.last() != Some(&b'\n') => return Err(BusError::Disconnected),
                Ok(_) => {
                    let line = std::mem::take(&mut self.pending);
                    match serde_json::from_slice::<WireFrame>(line.trim_ascii()) {
                        Ok(WireFrame::Message { topic, payload }) => {
                            return Ok(Some(Frame {
                                topic,
                                payload,
                                retain: false,
                            }));
                        }
                        Ok(other) => tracing::warn!(frame = ?other, "unexpected frame from broker"),
                        Err(e) => tracing::warn!(error = %e, "unparseable frame from broker"),
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(_) => return Err(BusError::Disconnected),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_frame_format() {
        let frame = WireFrame::Publish {
            topic: "ui_update".to_string(),
            payload: "{}".to_string(),
            retain: true,
        };
        let line = encode_line(&frame).unwrap();
        assert_eq!(
            line,
            "{\"op\":\"publish\",\"topic\":\"ui_update\",\"payload\":\"{}\",\"retain\":true}\n"
        );

        let parsed: WireFrame =
            serde_json::from_str(r#"{"op":"publish","topic":"t","payload":"p"}"#).unwrap();
        assert_eq!(
            parsed,
            WireFrame::Publish {
                topic: "t".to_string(),
                payload: "p".to_string(),
                retain: false
            }
        );
    }

    #[test]
    fn test_line_split_inside_utf8_char() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let transport = TcpTransport::new(listener.local_addr().unwrap().to_string());
        let mut connection = transport.connect().unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let line = encode_line(&WireFrame::Message {
            topic: "ui_update".to_string(),
            payload: "caf\u{e9}".to_string(),
        })
        .unwrap();
        let bytes = line.as_bytes();
        // Cut between the two bytes of the accented character
        let cut = line.find('\u{e9}').unwrap() + 1;

        server.write_all(&bytes[..cut]).unwrap();
        server.flush().unwrap();
        assert!(connection.poll(Duration::from_millis(20)).unwrap().is_none());

        server.write_all(&bytes[cut..]).unwrap();
        let frame = connection.poll(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(frame.topic, "ui_update");
        assert_eq!(frame.payload, "caf\u{e9}");
    }

    #[test]
    fn test_unreachable_broker() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let transport = TcpTransport::new(format!("127.0.0.1:{}", port))
            .with_connect_timeout(Duration::from_millis(200));

        assert!(matches!(
            transport.connect(),
            Err(BusError::TransportUnavailable(_))
        ));
    }
}
