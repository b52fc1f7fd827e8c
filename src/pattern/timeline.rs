// Timeline - Tempo and time signature for the step grid

use std::fmt;

/// Highest tempo accepted anywhere in the system
pub const MAX_BPM: u16 = 200;

/// Tempo used for a fresh pattern and a missing durable record
pub const DEFAULT_BPM: u16 = 100;

/// Time signature supported by the looper
///
/// Each signature defines a grid of `numerator * denominator` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeSignature {
    ThreeFour,
    #[default]
    FourFour,
    FiveFour,
}

impl TimeSignature {
    pub const ALL: [TimeSignature; 3] = [
        TimeSignature::ThreeFour,
        TimeSignature::FourFour,
        TimeSignature::FiveFour,
    ];

    /// Beats per bar
    pub fn numerator(&self) -> u8 {
        match self {
            TimeSignature::ThreeFour => 3,
            TimeSignature::FourFour => 4,
            TimeSignature::FiveFour => 5,
        }
    }

    /// Note value (always a quarter note here)
    pub fn denominator(&self) -> u8 {
        4
    }

    /// Display label, also the wire representation ("4/4")
    pub fn label(&self) -> &'static str {
        match self {
            TimeSignature::ThreeFour => "3/4",
            TimeSignature::FourFour => "4/4",
            TimeSignature::FiveFour => "5/4",
        }
    }

    /// Number of steps in one pattern for this signature
    pub fn step_count(&self) -> usize {
        self.numerator() as usize * self.denominator() as usize
    }

    /// Find the signature whose grid has exactly `steps` slots
    pub fn from_step_count(steps: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|sig| sig.step_count() == steps)
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|sig| sig.label() == label.trim())
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<String> for TimeSignature {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_label(&value).ok_or_else(|| format!("unknown time signature '{}'", value))
    }
}

impl From<TimeSignature> for String {
    fn from(value: TimeSignature) -> Self {
        value.label().to_string()
    }
}

/// Tempo in BPM, validated to `[0, MAX_BPM]`
///
/// Zero is a legal stored value meaning "paused"; it has no step interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Tempo {
    bpm: u16,
}

/// Tempo above `MAX_BPM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("tempo {0} BPM is outside 0-{max}", max = MAX_BPM)]
pub struct TempoOutOfRange(pub u16);

impl Tempo {
    pub const PAUSED: Tempo = Tempo { bpm: 0 };

    pub fn new(bpm: u16) -> Result<Self, TempoOutOfRange> {
        if bpm > MAX_BPM {
            return Err(TempoOutOfRange(bpm));
        }
        Ok(Self { bpm })
    }

    pub fn bpm(&self) -> u16 {
        self.bpm
    }

    pub fn is_paused(&self) -> bool {
        self.bpm == 0
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self { bpm: DEFAULT_BPM }
    }
}

impl TryFrom<u16> for Tempo {
    type Error = TempoOutOfRange;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Tempo> for u16 {
    fn from(value: Tempo) -> Self {
        value.bpm
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} BPM", self.bpm)
    }
}
