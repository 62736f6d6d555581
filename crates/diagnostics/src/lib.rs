//! Fatal Diagnostics
//!
//! The device has no console. A fatal condition stops the foreground loop
//! and blinks two indicators forever: N blinks of the primary for every
//! blink of the secondary, where N is the condition code.

use std::fmt;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Conditions that halt recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FatalCondition {
    Generic = 1,
    CardNotInitialized = 2,
    BufferOverflow = 3,
    /// Ring cursor or capacity out of range
    BufferPointer = 4,
}

impl FatalCondition {
    /// Blink count of the primary indicator
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(FatalCondition::Generic),
            2 => Some(FatalCondition::CardNotInitialized),
            3 => Some(FatalCondition::BufferOverflow),
            4 => Some(FatalCondition::BufferPointer),
            _ => None,
        }
    }
}

impl fmt::Display for FatalCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FatalCondition::Generic => "generic error",
            FatalCondition::CardNotInitialized => "SD card not initialized",
            FatalCondition::BufferOverflow => "buffer overflow",
            FatalCondition::BufferPointer => "buffer pointer out of range",
        };
        write!(f, "{} (code {})", name, self.code())
    }
}

/// On and off time of each blink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkTiming {
    pub on_ms: u32,
    pub off_ms: u32,
}

impl Default for BlinkTiming {
    fn default() -> Self {
        Self {
            on_ms: 200,
            off_ms: 200,
        }
    }
}

/// The two status indicators and a way to wait
pub trait Indicators {
    fn set_primary(&mut self, on: bool);
    fn set_secondary(&mut self, on: bool);
    fn delay_ms(&mut self, ms: u32);
}

/// Indicators on two GPIO outputs (active high)
pub struct PinIndicators<P, S, D> {
    primary: P,
    secondary: S,
    delay: D,
}

impl<P: OutputPin, S: OutputPin, D: DelayNs> PinIndicators<P, S, D> {
    pub fn new(primary: P, secondary: S, delay: D) -> Self {
        Self {
            primary,
            secondary,
            delay,
        }
    }
}

fn drive<P: OutputPin>(pin: &mut P, on: bool) {
    // Nothing left to report a failed indicator write to.
    let _ = if on { pin.set_high() } else { pin.set_low() };
}

impl<P: OutputPin, S: OutputPin, D: DelayNs> Indicators for PinIndicators<P, S, D> {
    fn set_primary(&mut self, on: bool) {
        drive(&mut self.primary, on);
    }

    fn set_secondary(&mut self, on: bool) {
        drive(&mut self.secondary, on);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}

/// One repetition of the pattern for `condition`
pub fn signal_cycle<I: Indicators + ?Sized>(
    indicators: &mut I,
    condition: FatalCondition,
    timing: BlinkTiming,
) {
    for _ in 0..condition.code() {
        indicators.set_primary(true);
        indicators.delay_ms(timing.on_ms);
        indicators.set_primary(false);
        indicators.delay_ms(timing.off_ms);
    }
    indicators.set_secondary(true);
    indicators.delay_ms(timing.on_ms);
    indicators.set_secondary(false);
    indicators.delay_ms(timing.off_ms);
}

/// Stop everything and signal `condition` forever
pub fn halt<I: Indicators + ?Sized>(
    indicators: &mut I,
    condition: FatalCondition,
    timing: BlinkTiming,
) -> ! {
    error!(code = condition.code(), "Halting: {}", condition);
    loop {
        signal_cycle(indicators, condition, timing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Primary(bool),
        Secondary(bool),
        Delay(u32),
    }

    #[derive(Default)]
    struct Recorder(Vec<Event>);

    impl Indicators for Recorder {
        fn set_primary(&mut self, on: bool) {
            self.0.push(Event::Primary(on));
        }

        fn set_secondary(&mut self, on: bool) {
            self.0.push(Event::Secondary(on));
        }

        fn delay_ms(&mut self, ms: u32) {
            self.0.push(Event::Delay(ms));
        }
    }

    #[test]
    fn test_codes_are_disjoint() {
        let all = [
            FatalCondition::Generic,
            FatalCondition::CardNotInitialized,
            FatalCondition::BufferOverflow,
            FatalCondition::BufferPointer,
        ];
        for (i, condition) in all.iter().enumerate() {
            assert_eq!(condition.code() as usize, i + 1);
            assert_eq!(FatalCondition::from_code(condition.code()), Some(*condition));
        }
        assert_eq!(FatalCondition::from_code(0), None);
        assert_eq!(FatalCondition::from_code(5), None);
    }

    #[test]
    fn test_blink_ratio_encodes_code() {
        let mut recorder = Recorder::default();
        signal_cycle(&mut recorder, FatalCondition::BufferOverflow, BlinkTiming::default());

        let primary = recorder.0.iter().filter(|e| **e == Event::Primary(true)).count();
        let secondary = recorder.0.iter().filter(|e| **e == Event::Secondary(true)).count();
        assert_eq!(primary, 3);
        assert_eq!(secondary, 1);

        assert_eq!(
            &recorder.0[..4],
            &[
                Event::Primary(true),
                Event::Delay(200),
                Event::Primary(false),
                Event::Delay(200)
            ]
        );
        assert_eq!(recorder.0.last(), Some(&Event::Delay(200)));
    }

    #[test]
    fn test_display_includes_code() {
        assert_eq!(
            FatalCondition::CardNotInitialized.to_string(),
            "SD card not initialized (code 2)"
        );
    }
}
