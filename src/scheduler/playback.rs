// Playback scheduler - cancellable deadline loop walking the step sequence

use super::interval::{SchedulerError, nominal_interval, step_interval};
use crate::clock::{Clock, StopSignal, WaitOutcome};
use crate::messaging::{Notification, NotificationCategory, SharedNotifier, notify};
use crate::output::OutputSink;
use crate::pattern::{Pattern, StepValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

const NO_STEP: usize = usize::MAX;

/// What the scheduler plays: sampled once, when playback starts
///
/// Later edits to the pattern do not reach a running loop; they are picked
/// up by the next `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSequence {
    pub steps: Vec<StepValue>,
    pub bpm: u16,
    pub swing: bool,
}

impl StepSequence {
    pub fn new(steps: Vec<StepValue>, bpm: u16, swing: bool) -> Self {
        Self { steps, bpm, swing }
    }
}

impl From<&Pattern> for StepSequence {
    fn from(pattern: &Pattern) -> Self {
        Self::new(
            pattern.steps().to_vec(),
            pattern.tempo().bpm(),
            pattern.swing_enabled(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Running,
}

struct RunningLoop {
    stop: StopSignal,
    handle: thread::JoinHandle<()>,
}

/// Step sequencer driving an [`OutputSink`]
///
/// One timing thread per run. `stop` interrupts the current wait right away
/// and leaves the sink silent.
pub struct PlaybackScheduler {
    sink: Arc<dyn OutputSink>,
    clock: Arc<dyn Clock>,
    running: Mutex<Option<RunningLoop>>,
    current_step: Arc<AtomicUsize>,
    notifier: Option<SharedNotifier>,
}

impl PlaybackScheduler {
    pub fn new(sink: Arc<dyn OutputSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink,
            clock,
            running: Mutex::new(None),
            current_step: Arc::new(AtomicUsize::new(NO_STEP)),
            notifier: None,
        }
    }

    /// Report playback failures on `notifier`
    pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn state(&self) -> PlaybackState {
        if self.lock_running().is_some() {
            PlaybackState::Running
        } else {
            PlaybackState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == PlaybackState::Running
    }

    /// Index of the step dispatched last, while running
    pub fn current_step(&self) -> Option<usize> {
        match self.current_step.load(Ordering::Acquire) {
            NO_STEP => None,
            index => Some(index),
        }
    }

    /// Start looping over `sequence`
    ///
    /// An empty sequence has nothing to play: returns `Ok` and stays stopped.
    pub fn start(&self, sequence: StepSequence) -> Result<(), SchedulerError> {
        let mut running = self.lock_running();
        if running.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let nominal = nominal_interval(sequence.bpm)?;
        if sequence.steps.is_empty() {
            tracing::debug!("empty sequence, nothing to play");
            return Ok(());
        }

        let bpm = sequence.bpm;
        let stop = StopSignal::new();
        let handle = {
            let sink = Arc::clone(&self.sink);
            let clock = Arc::clone(&self.clock);
            let current_step = Arc::clone(&self.current_step);
            let stop = stop.clone();
            thread::Builder::new()
                .name("lampi-playback".to_string())
                .spawn(move || {
                    run_loop(&sequence, nominal, sink.as_ref(), clock.as_ref(), &stop, &current_step)
                })
                .map_err(|e| {
                    tracing::error!(error = %e, "failed to spawn playback thread");
                    self.report(format!("failed to spawn playback thread: {}", e));
                    SchedulerError::ThreadSpawn
                })?
        };

        tracing::info!(bpm, ?nominal, "playback started");
        *running = Some(RunningLoop { stop, handle });
        Ok(())
    }

    /// Stop playback and silence the sink
    ///
    /// No-op when stopped. Otherwise returns once the loop has exited and
    /// `OutputSink::clear` has run.
    pub fn stop(&self) {
        let Some(RunningLoop { stop, handle }) = self.lock_running().take() else {
            return;
        };

        stop.raise();
        if handle.join().is_err() {
            tracing::error!("playback thread panicked");
            self.report("playback thread panicked".to_string());
        }
        self.current_step.store(NO_STEP, Ordering::Release);
        self.sink.clear();
        tracing::info!("playback stopped");
    }

    fn report(&self, message: String) {
        notify(
            self.notifier.as_ref(),
            Notification::error(NotificationCategory::Playback, message),
        );
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<RunningLoop>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    sequence: &StepSequence,
    nominal: Duration,
    sink: &dyn OutputSink,
    clock: &dyn Clock,
    stop: &StopSignal,
    current_step: &AtomicUsize,
) {
    let mut deadline = clock.now();
    let mut index = 0;

    while !stop.is_raised() {
        current_step.store(index, Ordering::Release);
        sink.dispatch(sequence.steps[index]);

        // Deadlines accumulate from the start time, so dispatch cost never drifts the grid
        deadline += step_interval(nominal, index, sequence.swing);
        if clock.wait_until(deadline, stop) == WaitOutcome::Stopped {
            break;
        }

        index = (index + 1) % sequence.steps.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::messaging::{NotificationLevel, create_notification_channel};
    use ringbuf::traits::Consumer;

    #[derive(Default)]
    struct CountingSink {
        dispatched: Mutex<Vec<StepValue>>,
        clears: AtomicUsize,
    }

    impl OutputSink for CountingSink {
        fn dispatch(&self, step: StepValue) {
            self.dispatched.lock().unwrap().push(step);
        }

        fn clear(&self) {
            self.clears.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn scheduler(budget: usize) -> (PlaybackScheduler, Arc<CountingSink>, Arc<ManualClock>) {
        let sink = Arc::new(CountingSink::default());
        let clock = Arc::new(ManualClock::with_budget(budget));
        let scheduler = PlaybackScheduler::new(sink.clone(), clock.clone());
        (scheduler, sink, clock)
    }

    #[test]
    fn test_zero_tempo_rejected() {
        let (scheduler, sink, _) = scheduler(4);

        let result = scheduler.start(StepSequence::new(vec![StepValue::VoiceA; 16], 0, false));

        assert_eq!(result, Err(SchedulerError::InvalidTempo(0)));
        assert_eq!(scheduler.state(), PlaybackState::Stopped);
        assert!(sink.dispatched.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_sequence_stays_stopped() {
        let (scheduler, sink, _) = scheduler(4);

        assert_eq!(scheduler.start(StepSequence::new(Vec::new(), 120, false)), Ok(()));

        assert!(!scheduler.is_running());
        scheduler.stop();
        assert_eq!(sink.clears.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_double_start_rejected() {
        let (scheduler, _, clock) = scheduler(2);
        let sequence = StepSequence::new(vec![StepValue::Silent; 12], 120, false);

        scheduler.start(sequence.clone()).unwrap();
        assert!(clock.wait_for_waits(2, Duration::from_secs(5)));

        assert_eq!(scheduler.start(sequence), Err(SchedulerError::AlreadyRunning));
        scheduler.stop();
    }

    #[test]
    fn test_dispatch_order_wraps() {
        let steps = vec![
            StepValue::VoiceA,
            StepValue::Silent,
            StepValue::VoiceB,
            StepValue::VoiceC,
        ];
        let (scheduler, sink, clock) = scheduler(6);

        scheduler.start(StepSequence::new(steps.clone(), 100, false)).unwrap();
        assert!(clock.wait_for_waits(6, Duration::from_secs(5)));
        scheduler.stop();

        // The seventh dispatch races with stop; the first six are certain
        let dispatched = sink.dispatched.lock().unwrap().clone();
        let expected: Vec<_> = steps.iter().cycle().take(dispatched.len()).copied().collect();
        assert!((6..=7).contains(&dispatched.len()));
        assert_eq!(dispatched, expected);
    }

    #[test]
    fn test_swung_intervals_at_120() {
        let (scheduler, _, clock) = scheduler(8);

        scheduler
            .start(StepSequence::new(vec![StepValue::Silent; 16], 120, true))
            .unwrap();
        assert!(clock.wait_for_waits(8, Duration::from_secs(5)));
        scheduler.stop();

        let n = Duration::from_millis(125);
        let s = Duration::from_micros(37_500);
        assert_eq!(clock.intervals(), vec![n, n, s, n, n, n, s, n]);
    }

    #[test]
    fn test_stop_clears_once_and_restart_works() {
        let (scheduler, sink, clock) = scheduler(3);
        let sequence = StepSequence::new(vec![StepValue::VoiceA; 12], 90, false);

        scheduler.start(sequence.clone()).unwrap();
        assert!(clock.wait_for_waits(3, Duration::from_secs(5)));
        scheduler.stop();
        scheduler.stop();

        assert_eq!(scheduler.state(), PlaybackState::Stopped);
        assert_eq!(scheduler.current_step(), None);
        assert_eq!(sink.clears.load(Ordering::SeqCst), 1);

        // Budget is spent, so the new loop parks after its first dispatch
        scheduler.start(sequence).unwrap();
        assert!(scheduler.is_running());
        scheduler.stop();
        assert_eq!(sink.clears.load(Ordering::SeqCst), 2);
    }

    struct PanickingSink;

    impl OutputSink for PanickingSink {
        fn dispatch(&self, _step: StepValue) {
            panic!("speaker unplugged");
        }

        fn clear(&self) {}
    }

    #[test]
    fn test_panicked_loop_is_reported() {
        let (tx, mut rx) = create_notification_channel(4);
        let scheduler = PlaybackScheduler::new(
            Arc::new(PanickingSink),
            Arc::new(ManualClock::unbounded()),
        )
        .with_notifier(Arc::new(Mutex::new(tx)));

        scheduler
            .start(StepSequence::new(vec![StepValue::VoiceA; 4], 120, false))
            .unwrap();
        scheduler.stop();

        let notification = rx.try_pop().expect("panic reported");
        assert_eq!(notification.category, NotificationCategory::Playback);
        assert_eq!(notification.level, NotificationLevel::Error);
        assert_eq!(scheduler.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_sequence_sampled_from_pattern() {
        let mut pattern = Pattern::default();
        pattern.set_step(2, StepValue::VoiceB).unwrap();
        pattern.set_tempo(140).unwrap();
        pattern.set_swing(true);

        let sequence = StepSequence::from(&pattern);

        assert_eq!(sequence.steps.len(), 16);
        assert_eq!(sequence.steps[2], StepValue::VoiceB);
        assert_eq!(sequence.bpm, 140);
        assert!(sequence.swing);
    }
}
