// Pattern - The shared musical state (steps, tempo, time signature, swing)

use super::snapshot::{OriginId, Snapshot, SnapshotError};
use super::step::StepValue;
use super::timeline::{Tempo, TempoOutOfRange, TimeSignature};

/// Errors raised by pattern mutations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("step {index} is out of range (pattern has {len} steps)")]
    StepOutOfRange { index: usize, len: usize },

    #[error(transparent)]
    TempoOutOfRange(#[from] TempoOutOfRange),

    #[error("pattern has {steps} steps but {signature} requires {expected}")]
    InvariantViolated {
        steps: usize,
        signature: TimeSignature,
        expected: usize,
    },

    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(#[from] SnapshotError),
}

/// Step-sequenced beat pattern
///
/// `steps.len()` always equals `time_signature.step_count()`; every mutator
/// keeps that true and `validate()` checks it before anything is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    steps: Vec<StepValue>,
    tempo: Tempo,
    time_signature: TimeSignature,
    swing_enabled: bool,
}

impl Pattern {
    /// Create an all-silent pattern for the given signature and tempo
    pub fn new(time_signature: TimeSignature, tempo: Tempo) -> Self {
        Self {
            steps: vec![StepValue::Silent; time_signature.step_count()],
            tempo,
            time_signature,
            swing_enabled: false,
        }
    }

    /// Rebuild a pattern from raw steps, inferring the signature from their count
    pub fn from_steps(steps: Vec<StepValue>, tempo: Tempo) -> Result<Self, PatternError> {
        let time_signature = TimeSignature::from_step_count(steps.len())
            .ok_or(SnapshotError::UnknownLength(steps.len()))?;
        Ok(Self {
            steps,
            tempo,
            time_signature,
            swing_enabled: false,
        })
    }

    pub fn steps(&self) -> &[StepValue] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<StepValue> {
        self.steps.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn swing_enabled(&self) -> bool {
        self.swing_enabled
    }

    /// True when no step holds a voice
    pub fn is_silent(&self) -> bool {
        self.steps.iter().all(|step| step.is_silent())
    }

    /// Advance one step through the toggle cycle, returning its new value
    pub fn toggle_step(&mut self, index: usize) -> Result<StepValue, PatternError> {
        let len = self.steps.len();
        let slot = self
            .steps
            .get_mut(index)
            .ok_or(PatternError::StepOutOfRange { index, len })?;
        *slot = slot.next();
        Ok(*slot)
    }

    pub fn set_step(&mut self, index: usize, value: StepValue) -> Result<(), PatternError> {
        let len = self.steps.len();
        let slot = self
            .steps
            .get_mut(index)
            .ok_or(PatternError::StepOutOfRange { index, len })?;
        *slot = value;
        Ok(())
    }

    pub fn set_tempo(&mut self, bpm: u16) -> Result<(), PatternError> {
        self.tempo = Tempo::new(bpm)?;
        Ok(())
    }

    /// Switch time signature
    ///
    /// A different signature reallocates the grid as all-silent; prior step
    /// values are discarded, never restored. The current signature is a no-op.
    pub fn set_time_signature(&mut self, time_signature: TimeSignature) {
        if time_signature == self.time_signature {
            return;
        }
        self.time_signature = time_signature;
        self.steps = vec![StepValue::Silent; time_signature.step_count()];
    }

    pub fn set_swing(&mut self, enabled: bool) {
        self.swing_enabled = enabled;
    }

    /// Silence every step, keeping tempo, signature and swing
    pub fn clear(&mut self) {
        self.steps.fill(StepValue::Silent);
    }

    /// Check the length invariant
    pub fn validate(&self) -> Result<(), PatternError> {
        let expected = self.time_signature.step_count();
        if self.steps.len() != expected {
            return Err(PatternError::InvariantViolated {
                steps: self.steps.len(),
                signature: self.time_signature,
                expected,
            });
        }
        Ok(())
    }

    /// Tag the current state with a writer identity for publishing
    pub fn to_snapshot(&self, origin_id: OriginId) -> Snapshot {
        Snapshot {
            origin_id,
            steps: self.steps.clone(),
            tempo_bpm: self.tempo,
            time_signature: Some(self.time_signature),
            swing_enabled: Some(self.swing_enabled),
        }
    }

    /// Overwrite this pattern with the fields a snapshot carries
    ///
    /// Steps and tempo are always replaced wholesale; signature and swing only
    /// when the snapshot carries them. Nothing is touched if the snapshot is
    /// malformed. Returns whether anything changed.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<bool, PatternError> {
        let time_signature = snapshot.resolved_signature()?;

        let mut next = self.clone();
        next.steps.clone_from(&snapshot.steps);
        next.tempo = snapshot.tempo_bpm;
        next.time_signature = time_signature;
        if let Some(swing) = snapshot.swing_enabled {
            next.swing_enabled = swing;
        }
        next.validate()?;

        if next == *self {
            return Ok(false);
        }
        *self = next;
        Ok(true)
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Self::new(TimeSignature::default(), Tempo::default())
    }
}
