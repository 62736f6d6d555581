//! Converter latch

use std::sync::atomic::{AtomicU16, Ordering};

/// Pack the three converter transfer words into a 16-bit sample
pub fn assemble_conversion(words: [u16; 3]) -> u16 {
    (words[0] << 14) | (words[1] << 6) | (words[2] >> 2)
}

/// Inverse of [`assemble_conversion`], as a converter would clock it out
pub fn split_conversion(sample: u16) -> [u16; 3] {
    [
        (sample >> 14) & 0x03,
        (sample >> 6) & 0xFF,
        (sample << 2) & 0xFC,
    ]
}

/// Last finished conversion. Written by the transfer-complete interrupt,
/// read by the timer interrupt one interval later.
#[derive(Debug, Default)]
pub struct SampleLatch {
    value: AtomicU16,
}

impl SampleLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transfer-complete handler: format and latch the raw words
    pub fn complete_conversion(&self, words: [u16; 3]) {
        self.store(assemble_conversion(words));
    }

    pub fn store(&self, sample: u16) {
        self.value.store(sample, Ordering::Release);
    }

    pub fn load(&self) -> u16 {
        self.value.load(Ordering::Acquire)
    }
}

/// Something that can be told to start the next conversion
pub trait ConversionSource {
    /// Kick off a conversion; the result lands in `latch` when done
    fn start_conversion(&mut self, latch: &SampleLatch);
}

/// Host stand-in for the converter: a ramp that completes immediately
#[derive(Debug, Clone)]
pub struct RampSource {
    next: u16,
    step: u16,
}

impl RampSource {
    pub fn new(start: u16, step: u16) -> Self {
        Self { next: start, step }
    }
}

impl ConversionSource for RampSource {
    fn start_conversion(&mut self, latch: &SampleLatch) {
        latch.complete_conversion(split_conversion(self.next));
        self.next = self.next.wrapping_add(self.step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_assemble_known_words() {
        assert_eq!(assemble_conversion([0x03, 0xFF, 0xFC]), 0xFFFF);
        assert_eq!(assemble_conversion([0x01, 0x00, 0x00]), 0x4000);
        assert_eq!(assemble_conversion([0x00, 0x01, 0x00]), 0x0040);
        // Low two bits of the last word are padding.
        assert_eq!(assemble_conversion([0x00, 0x00, 0x07]), 0x0001);
    }

    proptest! {
        #[test]
        fn test_split_reassembles(sample in any::<u16>()) {
            prop_assert_eq!(assemble_conversion(split_conversion(sample)), sample);
        }
    }

    #[test]
    fn test_ramp_latches_each_value() {
        let latch = SampleLatch::new();
        let mut ramp = RampSource::new(100, 3);
        ramp.start_conversion(&latch);
        assert_eq!(latch.load(), 100);
        ramp.start_conversion(&latch);
        assert_eq!(latch.load(), 103);
    }
}
