// Persistence daemon - mirrors bus updates into the durable record
//
// The daemon only writes storage. It never republishes what it persisted, so
// a save cannot be mistaken for a new edit by the other writers. The one
// exception is startup: when the broker holds no retained state, the durable
// snapshot is published once so late joiners still converge.

use super::durable::{DurableRecord, DurableStore};
use crate::bus::SyncBus;
use crate::config::StorageConfig;
use crate::messaging::{Notification, NotificationCategory, SharedNotifier, notify};
use crate::pattern::{Pattern, PatternStore};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub struct PersistenceDaemon {
    store: PatternStore,
    durable: Arc<DurableStore>,
}

impl PersistenceDaemon {
    /// Load the durable record and start mirroring `bus`
    ///
    /// A record that cannot be read is reported and replaced by the default
    /// one; the daemon keeps running either way.
    pub fn start(
        bus: &SyncBus,
        durable: DurableStore,
        config: &StorageConfig,
        notifier: Option<SharedNotifier>,
    ) -> Self {
        let (initial, on_disk) = load_or_default(&durable, notifier.as_ref());
        let store = PatternStore::new(bus.origin().clone(), initial);
        let durable = Arc::new(durable);
        // Record known to be on disk; anything else still needs a save
        let saved = Arc::new(Mutex::new(on_disk));

        {
            let store = store.clone();
            let durable = Arc::clone(&durable);
            bus.subscribe_snapshots(move |snapshot| {
                if let Err(e) = store.apply_remote_snapshot(snapshot) {
                    tracing::warn!(error = %e, "snapshot not persisted");
                    return;
                }

                let record = DurableRecord::from(&store.current());
                let mut saved = saved.lock().unwrap_or_else(PoisonError::into_inner);
                if saved.as_ref() == Some(&record) {
                    tracing::trace!(origin = %snapshot.origin_id, "snapshot already persisted");
                    return;
                }

                match durable.save_durable(&record) {
                    Ok(()) => *saved = Some(record),
                    Err(e) => {
                        // Memory stays the source of truth; the next delivery retries
                        tracing::error!(error = %e, "failed to persist pattern");
                        notify(
                            notifier.as_ref(),
                            Notification::error(NotificationCategory::Persistence, e.to_string()),
                        );
                    }
                }
            });
        }

        let daemon = Self { store, durable };
        if config.seed_bus_on_start {
            daemon.seed(bus, Duration::from_millis(config.seed_settle_ms));
        }
        daemon
    }

    /// Publish the durable snapshot if no retained state shows up within `settle`
    fn seed(&self, bus: &SyncBus, settle: Duration) {
        if !bus.wait_connected(settle) {
            tracing::warn!("broker not reachable yet, skipping startup seed");
            return;
        }
        if bus.wait_for_snapshot(settle).is_some() {
            tracing::debug!("retained state present, not seeding");
            return;
        }

        tracing::info!(path = %self.durable.path().display(), "seeding bus from durable record");
        bus.publish_snapshot(&self.store.snapshot());
    }

    /// Pattern as last persisted (or loaded)
    pub fn current(&self) -> Pattern {
        self.store.current()
    }

    pub fn durable(&self) -> &DurableStore {
        &self.durable
    }
}

// Unusable records yield the default pattern and no on-disk record, so the
// first update overwrites them
fn load_or_default(
    durable: &DurableStore,
    notifier: Option<&SharedNotifier>,
) -> (Pattern, Option<DurableRecord>) {
    let loaded = durable.load_durable().map_err(|e| e.to_string()).and_then(|record| {
        let pattern = record.to_pattern().map_err(|e| e.to_string())?;
        Ok((pattern, record))
    });

    match loaded {
        Ok((pattern, record)) => (pattern, Some(record)),
        Err(reason) => {
            tracing::error!(%reason, "durable record unusable, starting from default");
            notify(
                notifier,
                Notification::warning(NotificationCategory::Persistence, reason),
            );
            (Pattern::default(), None)
        }
    }
}
