// Pattern store - Single-writer critical section around the local Pattern

use super::model::{Pattern, PatternError};
use super::snapshot::{OriginId, Snapshot};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type ChangeListener = Box<dyn Fn(&Pattern) + Send + Sync>;

/// Process-local owner of the Pattern
///
/// Local mutations (UI, BLE, buttons) and inbound bus snapshots are funneled
/// through one mutex, so they never interleave. Listeners run after the lock
/// is released and only when something actually changed.
#[derive(Clone)]
pub struct PatternStore {
    origin: OriginId,
    pattern: Arc<Mutex<Pattern>>,
    listeners: Arc<Mutex<Vec<ChangeListener>>>,
}

impl PatternStore {
    pub fn new(origin: OriginId, initial: Pattern) -> Self {
        Self {
            origin,
            pattern: Arc::new(Mutex::new(initial)),
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Identity stamped on snapshots produced by local mutations
    pub fn origin(&self) -> &OriginId {
        &self.origin
    }

    /// Point-in-time copy of the pattern
    pub fn current(&self) -> Pattern {
        self.lock_pattern().clone()
    }

    /// Current state as a snapshot tagged with the local origin
    pub fn snapshot(&self) -> Snapshot {
        self.lock_pattern().to_snapshot(self.origin.clone())
    }

    /// Register a listener called after every committed change
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&Pattern) + Send + Sync + 'static,
    {
        lock(&self.listeners).push(Box::new(listener));
    }

    /// Run a local mutation atomically
    ///
    /// The mutator works on a copy; the copy is validated and committed only
    /// if it differs from the current pattern. Returns the snapshot to publish,
    /// `None` when the mutation changed nothing. On error the store is
    /// untouched.
    pub fn apply_local_mutation<F>(&self, mutator: F) -> Result<Option<Snapshot>, PatternError>
    where
        F: FnOnce(&mut Pattern) -> Result<(), PatternError>,
    {
        self.commit_local(mutator, |_| {})
    }

    /// Like [`PatternStore::apply_local_mutation`], handing the snapshot to
    /// `publish` before the pattern lock is released
    ///
    /// Concurrent local writers therefore publish in the order they committed.
    /// `publish` must not touch this store.
    pub fn commit_local<F, P>(&self, mutator: F, publish: P) -> Result<Option<Snapshot>, PatternError>
    where
        F: FnOnce(&mut Pattern) -> Result<(), PatternError>,
        P: FnOnce(&Snapshot),
    {
        let (committed, snapshot) = {
            let mut pattern = self.lock_pattern();
            let mut working = pattern.clone();
            mutator(&mut working)?;
            working.validate()?;

            if working == *pattern {
                return Ok(None);
            }
            *pattern = working;

            let snapshot = pattern.to_snapshot(self.origin.clone());
            publish(&snapshot);
            (pattern.clone(), snapshot)
        };

        self.notify(&committed);
        Ok(Some(snapshot))
    }

    /// Replace local state with an inbound snapshot
    ///
    /// Returns `Ok(false)` when the snapshot equals the current state (no
    /// listeners fire), which makes repeated delivery harmless.
    pub fn apply_remote_snapshot(&self, snapshot: &Snapshot) -> Result<bool, PatternError> {
        let committed = {
            let mut pattern = self.lock_pattern();
            if !pattern.apply_snapshot(snapshot)? {
                return Ok(false);
            }
            pattern.clone()
        };

        tracing::debug!(
            origin = %snapshot.origin_id,
            tempo = %committed.tempo(),
            signature = %committed.time_signature(),
            "applied remote snapshot"
        );
        self.notify(&committed);
        Ok(true)
    }

    fn notify(&self, pattern: &Pattern) {
        for listener in lock(&self.listeners).iter() {
            listener(pattern);
        }
    }

    fn lock_pattern(&self) -> MutexGuard<'_, Pattern> {
        lock(&self.pattern)
    }
}

// A panicking listener must not wedge the store
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{StepValue, Tempo, TimeSignature};
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn store() -> PatternStore {
        PatternStore::new(OriginId::from_raw("local"), Pattern::default())
    }

    #[test]
    fn test_local_mutation_returns_snapshot() {
        let store = store();
        let snapshot = store
            .apply_local_mutation(|p| p.toggle_step(2).map(|_| ()))
            .unwrap()
            .expect("toggle changes the pattern");

        assert_eq!(snapshot.origin_id, OriginId::from_raw("local"));
        assert_eq!(snapshot.steps[2], StepValue::VoiceA);
        assert_eq!(store.current().step(2), Some(StepValue::VoiceA));
    }

    #[test]
    fn test_unchanged_mutation_returns_none() {
        let store = store();
        let result = store.apply_local_mutation(|p| p.set_tempo(100)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_failed_mutation_is_atomic() {
        let store = store();
        let result = store.apply_local_mutation(|p| {
            p.set_step(0, StepValue::VoiceC)?;
            p.set_tempo(999)
        });

        assert!(result.is_err());
        assert_eq!(store.current(), Pattern::default());
    }

    #[test]
    fn test_listeners_fire_only_on_change() {
        let store = store();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        store.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut remote = Pattern::new(TimeSignature::FourFour, Tempo::new(90).unwrap());
        remote.set_step(7, StepValue::VoiceB).unwrap();
        let snapshot = remote.to_snapshot(OriginId::from_raw("remote"));

        assert!(store.apply_remote_snapshot(&snapshot).unwrap());
        assert!(!store.apply_remote_snapshot(&snapshot).unwrap());
        store.apply_local_mutation(|p| p.set_tempo(90)).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remote_apply_is_idempotent_for_random_patterns() {
        let mut rng = rand::thread_rng();

        for _ in 0..50 {
            let signature = TimeSignature::ALL[rng.gen_range(0..3)];
            let mut source = Pattern::new(signature, Tempo::new(rng.gen_range(0..=200)).unwrap());
            for index in 0..source.len() {
                let value = StepValue::ALL[rng.gen_range(0..4)];
                source.set_step(index, value).unwrap();
            }
            source.set_swing(rng.gen_range(0..2) == 1);
            let snapshot = source.to_snapshot(OriginId::from_raw("remote"));

            let once = store();
            once.apply_remote_snapshot(&snapshot).unwrap();
            let twice = store();
            twice.apply_remote_snapshot(&snapshot).unwrap();
            twice.apply_remote_snapshot(&snapshot).unwrap();

            assert_eq!(once.current(), twice.current());
            assert_eq!(once.current(), source);
        }
    }

    #[test]
    fn test_publish_follows_commit_order() {
        let store = store();
        let published = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..4u16)
            .map(|worker| {
                let store = store.clone();
                let published = Arc::clone(&published);
                thread::spawn(move || {
                    for round in 0..50u16 {
                        let bpm = 1 + worker * 50 + round;
                        store
                            .commit_local(|p| p.set_tempo(bpm), |snapshot| {
                                published.lock().unwrap().push(snapshot.tempo_bpm)
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // The last snapshot out is the state the store kept
        let last = *published.lock().unwrap().last().unwrap();
        assert_eq!(last, store.current().tempo());
    }

    #[test]
    fn test_concurrent_toggles_are_not_lost() {
        let store = store();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        store
                            .apply_local_mutation(|p| p.toggle_step(0).map(|_| ()))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // 400 toggles through a 4-value cycle land back on Silent
        assert_eq!(store.current().step(0), Some(StepValue::Silent));
    }
}
