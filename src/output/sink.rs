// Output sink - turns dispatched steps into light and sound

use super::dispatch::{LedColor, StepOutput, Voice};
use crate::pattern::StepValue;

/// Destination for the scheduler's per-step output
///
/// Called from the timing thread: `dispatch` must return immediately and
/// never wait for a sound to finish.
pub trait OutputSink: Send + Sync {
    fn dispatch(&self, step: StepValue);

    /// Force silence: no voice, LED off
    fn clear(&self);
}

/// Something that can show an RGB color (PWM pins, a bus topic, a log)
pub trait LedDriver: Send + Sync {
    fn set_color(&self, color: LedColor);
}

/// Fire-and-forget sample player
pub trait SoundTrigger: Send + Sync {
    fn trigger(&self, voice: Voice);

    /// Cut every playing voice
    fn silence(&self);
}

/// Sink applying the dispatch table to an LED driver and a sound trigger
pub struct MixerSink<L, S> {
    led: L,
    sound: S,
}

impl<L: LedDriver, S: SoundTrigger> MixerSink<L, S> {
    pub fn new(led: L, sound: S) -> Self {
        Self { led, sound }
    }

    pub fn led(&self) -> &L {
        &self.led
    }

    pub fn sound(&self) -> &S {
        &self.sound
    }
}

impl<L: LedDriver, S: SoundTrigger> OutputSink for MixerSink<L, S> {
    fn dispatch(&self, step: StepValue) {
        let output = StepOutput::for_step(step);
        if let Some(voice) = output.voice {
            self.sound.trigger(voice);
        }
        self.led.set_color(output.color);
    }

    fn clear(&self) {
        self.sound.silence();
        self.led.set_color(LedColor::OFF);
    }
}

/// LED driver that only logs, for headless runs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLed;

impl LedDriver for TracingLed {
    fn set_color(&self, color: LedColor) {
        let [r, g, b] = color.to_duty_cycles(1000);
        tracing::debug!(r, g, b, "led");
    }
}

/// Sound trigger that only logs, for headless runs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSound;

impl SoundTrigger for TracingSound {
    fn trigger(&self, voice: Voice) {
        tracing::debug!(%voice, "trigger");
    }

    fn silence(&self) {
        tracing::debug!("silence");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl Log {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl LedDriver for &Log {
        fn set_color(&self, color: LedColor) {
            self.0.lock().unwrap().push(format!("led {:?}", color.to_duty_cycles(1)));
        }
    }

    impl SoundTrigger for &Log {
        fn trigger(&self, voice: Voice) {
            self.0.lock().unwrap().push(format!("play {}", voice));
        }

        fn silence(&self) {
            self.0.lock().unwrap().push("silence".to_string());
        }
    }

    #[test]
    fn test_voice_step_triggers_sound_then_led() {
        let log = Log::default();
        let sink = MixerSink::new(&log, &log);

        sink.dispatch(StepValue::VoiceB);

        assert_eq!(log.take(), vec!["play snare", "led [0, 1, 0]"]);
    }

    #[test]
    fn test_silent_step_turns_led_off_without_sound() {
        let log = Log::default();
        let sink = MixerSink::new(&log, &log);

        sink.dispatch(StepValue::Silent);

        assert_eq!(log.take(), vec!["led [0, 0, 0]"]);
    }

    #[test]
    fn test_clear_silences_everything() {
        let log = Log::default();
        let sink = MixerSink::new(&log, &log);

        sink.clear();

        assert_eq!(log.take(), vec!["silence", "led [0, 0, 0]"]);
    }
}
