// Snapshot - Identity-tagged copy of the pattern sent between processes

use super::step::StepValue;
use super::timeline::{Tempo, TimeSignature};
use std::fmt;

/// Opaque identity of a bus writer
///
/// Only ever compared for equality to suppress loopback; never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct OriginId(String);

impl OriginId {
    /// Generate a fresh identity, prefixed with a readable role name
    pub fn generate(role: &str) -> Self {
        Self(format!("{}-{}", role, uuid::Uuid::new_v4().simple()))
    }

    /// Wrap an identity received from elsewhere (wire, config)
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full-state snapshot carried on the state topic
///
/// Time signature and swing are optional on the wire. Legacy surfaces send
/// `client`/`loop`/`bpm`, accepted here as aliases.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    #[serde(alias = "client")]
    pub origin_id: OriginId,
    #[serde(alias = "loop")]
    pub steps: Vec<StepValue>,
    #[serde(alias = "bpm")]
    pub tempo_bpm: Tempo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_signature: Option<TimeSignature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swing_enabled: Option<bool>,
}

/// Snapshot that fails shape validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("{steps} steps do not match time signature {signature}")]
    LengthMismatch {
        steps: usize,
        signature: TimeSignature,
    },

    #[error("{0} steps match no known time signature")]
    UnknownLength(usize),
}

impl Snapshot {
    /// Time signature this snapshot describes
    ///
    /// Uses the carried signature when present, otherwise infers it from the
    /// number of steps.
    pub fn resolved_signature(&self) -> Result<TimeSignature, SnapshotError> {
        match self.time_signature {
            Some(signature) if signature.step_count() == self.steps.len() => Ok(signature),
            Some(signature) => Err(SnapshotError::LengthMismatch {
                steps: self.steps.len(),
                signature,
            }),
            None => TimeSignature::from_step_count(self.steps.len())
                .ok_or(SnapshotError::UnknownLength(self.steps.len())),
        }
    }

    pub fn validate(&self) -> Result<(), SnapshotError> {
        self.resolved_signature().map(|_| ())
    }
}
