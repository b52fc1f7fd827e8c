// Dispatch table - what a step sounds and looks like

use crate::pattern::StepValue;
use std::fmt;

/// Three-channel LED intensity, each channel in `[0, 1]`
///
/// Also the payload of the lighting topic (`{"r":..,"g":..,"b":..}`).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LedColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl LedColor {
    pub const OFF: LedColor = LedColor::new(0.0, 0.0, 0.0);
    pub const RED: LedColor = LedColor::new(1.0, 0.0, 0.0);
    pub const GREEN: LedColor = LedColor::new(0.0, 1.0, 0.0);
    pub const BLUE: LedColor = LedColor::new(0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Copy with every channel clamped into `[0, 1]` (NaN becomes 0)
    pub fn clamped(self) -> Self {
        fn channel(value: f32) -> f32 {
            if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
        }
        Self::new(channel(self.r), channel(self.g), channel(self.b))
    }

    pub fn is_off(&self) -> bool {
        *self == Self::OFF
    }

    /// PWM duty cycles for a driver whose full scale is `range`
    pub fn to_duty_cycles(self, range: u16) -> [u16; 3] {
        let c = self.clamped();
        let scale = |v: f32| (v * range as f32).round() as u16;
        [scale(c.r), scale(c.g), scale(c.b)]
    }
}

impl Default for LedColor {
    fn default() -> Self {
        Self::OFF
    }
}

/// Percussion voice triggered by a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Voice {
    Tom,
    Snare,
    HiHat,
}

impl Voice {
    /// Sample name the sound collaborator loads for this voice
    pub fn sample_name(&self) -> &'static str {
        match self {
            Voice::Tom => "tom",
            Voice::Snare => "snare",
            Voice::HiHat => "hi_hat",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sample_name())
    }
}

/// What the hardware should do for one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    pub voice: Option<Voice>,
    pub color: LedColor,
}

impl StepOutput {
    pub const SILENCE: StepOutput = StepOutput {
        voice: None,
        color: LedColor::OFF,
    };

    /// The step → (sound, color) table; pure, no side effects
    pub fn for_step(step: StepValue) -> Self {
        match step {
            StepValue::Silent => Self::SILENCE,
            StepValue::VoiceA => Self {
                voice: Some(Voice::Tom),
                color: LedColor::BLUE,
            },
            StepValue::VoiceB => Self {
                voice: Some(Voice::Snare),
                color: LedColor::GREEN,
            },
            StepValue::VoiceC => Self {
                voice: Some(Voice::HiHat),
                color: LedColor::RED,
            },
        }
    }
}
