// Control facade - what UI screens, BLE characteristics and buttons call
//
// Pattern edits are a local mutation followed by a publish. Playback calls
// only touch the scheduler.

use crate::bus::SyncBus;
use crate::pattern::{Pattern, PatternError, PatternStore, StepValue, TimeSignature};
use crate::scheduler::{PlaybackScheduler, PlaybackState, SchedulerError, StepSequence};
use std::sync::Arc;

pub struct LampController {
    store: PatternStore,
    bus: Arc<SyncBus>,
    scheduler: PlaybackScheduler,
}

impl LampController {
    /// Wire a local store to `bus` and `scheduler`
    ///
    /// The store takes the bus origin, so its own publishes are not applied
    /// back to it.
    pub fn new(bus: Arc<SyncBus>, initial: Pattern, scheduler: PlaybackScheduler) -> Self {
        let store = PatternStore::new(bus.origin().clone(), initial);

        {
            let store = store.clone();
            bus.subscribe_snapshots(move |snapshot| {
                if let Err(e) = store.apply_remote_snapshot(snapshot) {
                    tracing::warn!(error = %e, origin = %snapshot.origin_id, "remote snapshot rejected");
                }
            });
        }

        Self {
            store,
            bus,
            scheduler,
        }
    }

    pub fn store(&self) -> &PatternStore {
        &self.store
    }

    pub fn pattern(&self) -> Pattern {
        self.store.current()
    }

    /// Cycle step `index` to its next value and publish
    pub fn toggle_step(&self, index: usize) -> Result<StepValue, PatternError> {
        let mut toggled = StepValue::Silent;
        self.commit(|pattern| {
            toggled = pattern.toggle_step(index)?;
            Ok(())
        })?;
        Ok(toggled)
    }

    pub fn set_step(&self, index: usize, value: StepValue) -> Result<bool, PatternError> {
        self.commit(|pattern| pattern.set_step(index, value))
    }

    pub fn set_tempo(&self, bpm: u16) -> Result<bool, PatternError> {
        self.commit(|pattern| pattern.set_tempo(bpm))
    }

    /// Switch signature; the grid restarts all silent
    pub fn set_time_signature(&self, time_signature: TimeSignature) -> Result<bool, PatternError> {
        self.commit(|pattern| {
            pattern.set_time_signature(time_signature);
            Ok(())
        })
    }

    pub fn set_swing(&self, enabled: bool) -> Result<bool, PatternError> {
        self.commit(|pattern| {
            pattern.set_swing(enabled);
            Ok(())
        })
    }

    pub fn clear_pattern(&self) -> Result<bool, PatternError> {
        self.commit(|pattern| {
            pattern.clear();
            Ok(())
        })
    }

    /// Play the pattern as it is now
    pub fn start_playback(&self) -> Result<(), SchedulerError> {
        self.scheduler
            .start(StepSequence::from(&self.store.current()))
    }

    pub fn stop_playback(&self) {
        self.scheduler.stop();
    }

    /// Play/stop button
    pub fn toggle_playback(&self) -> Result<PlaybackState, SchedulerError> {
        if self.scheduler.is_running() {
            self.scheduler.stop();
        } else {
            self.start_playback()?;
        }
        Ok(self.scheduler.state())
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.scheduler.state()
    }

    pub fn current_step(&self) -> Option<usize> {
        self.scheduler.current_step()
    }

    // Returns whether anything changed (and was published)
    //
    // The snapshot is queued while the store lock is held, so concurrent
    // edits leave the bus in the same order they hit the store.
    fn commit<F>(&self, mutator: F) -> Result<bool, PatternError>
    where
        F: FnOnce(&mut Pattern) -> Result<(), PatternError>,
    {
        let published = self
            .store
            .commit_local(mutator, |snapshot| self.bus.publish_snapshot(snapshot))?;
        Ok(published.is_some())
    }
}
