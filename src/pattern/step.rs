// Step values - the four states a pattern slot can hold

use std::fmt;

/// Value held by one pattern slot
///
/// Encoded on the wire and on disk as a small integer (0-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum StepValue {
    #[default]
    Silent = 0,
    VoiceA = 1,
    VoiceB = 2,
    VoiceC = 3,
}

impl StepValue {
    /// All values in toggle order
    pub const ALL: [StepValue; 4] = [
        StepValue::Silent,
        StepValue::VoiceA,
        StepValue::VoiceB,
        StepValue::VoiceC,
    ];

    /// Next value in the toggle cycle (Silent → A → B → C → Silent)
    pub fn next(self) -> Self {
        match self {
            StepValue::Silent => StepValue::VoiceA,
            StepValue::VoiceA => StepValue::VoiceB,
            StepValue::VoiceB => StepValue::VoiceC,
            StepValue::VoiceC => StepValue::Silent,
        }
    }

    pub fn is_silent(self) -> bool {
        self == StepValue::Silent
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Raw value outside the 0-3 step domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid step value {0} (expected 0-3)")]
pub struct InvalidStepValue(pub u8);

impl TryFrom<u8> for StepValue {
    type Error = InvalidStepValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StepValue::Silent),
            1 => Ok(StepValue::VoiceA),
            2 => Ok(StepValue::VoiceB),
            3 => Ok(StepValue::VoiceC),
            other => Err(InvalidStepValue(other)),
        }
    }
}

impl From<StepValue> for u8 {
    fn from(value: StepValue) -> Self {
        value as u8
    }
}

impl fmt::Display for StepValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepValue::Silent => "silent",
            StepValue::VoiceA => "voice-a",
            StepValue::VoiceB => "voice-b",
            StepValue::VoiceC => "voice-c",
        };
        f.write_str(name)
    }
}
