// Step timing - nominal and swung step intervals

use crate::pattern::MAX_BPM;
use std::time::Duration;

/// Swung steps last 3/10 of a nominal step
const SWING_NUMERATOR: u32 = 3;
const SWING_DENOMINATOR: u32 = 10;

/// Steps per swing group; the third step of each group is shortened
const SWING_GROUP: usize = 4;
const SWING_SLOT: usize = 2;

/// Scheduler error types
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("tempo {0} BPM cannot drive playback (expected 1-{max})", max = MAX_BPM)]
    InvalidTempo(u16),

    #[error("playback is already running")]
    AlreadyRunning,

    #[error("failed to spawn playback thread")]
    ThreadSpawn,
}

/// Nominal step length at `bpm`: a quarter of a beat
///
/// Exact in nanoseconds (`15e9 / bpm`), so 120 BPM is 125 ms on the nose.
pub fn nominal_interval(bpm: u16) -> Result<Duration, SchedulerError> {
    if bpm == 0 || bpm > MAX_BPM {
        return Err(SchedulerError::InvalidTempo(bpm));
    }
    Ok(Duration::from_nanos(15_000_000_000 / bpm as u64))
}

/// Whether step `index` falls on the swung slot of its group
pub fn is_swung(index: usize) -> bool {
    index % SWING_GROUP == SWING_SLOT
}

/// Length of step `index`
///
/// With swing, the third step of every four is cut to 0.3 of nominal. The
/// following step is not lengthened to compensate.
pub fn step_interval(nominal: Duration, index: usize, swing: bool) -> Duration {
    if swing && is_swung(index) {
        nominal * SWING_NUMERATOR / SWING_DENOMINATOR
    } else {
        nominal
    }
}
