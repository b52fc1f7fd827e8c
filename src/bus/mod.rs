// Bus module - Shared-state synchronization between lampi processes
//
// Every process (UI, BLE peripheral, playback driver, persistence daemon)
// holds one SyncBus. Snapshots flow over a retained topic, LED colors over an
// ephemeral one. Transports are pluggable: an in-process broker for tests and
// single-process runs, a line-delimited JSON TCP broker across processes.

pub mod memory;
pub mod sync_bus;
pub mod tcp;
pub mod transport;

pub use memory::LocalBroker;
pub use sync_bus::{SyncBus, decode_snapshot};
pub use tcp::{TcpBroker, TcpBrokerHandle, TcpTransport};
pub use transport::{BusError, Connection, Frame, Transport};
