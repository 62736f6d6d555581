//! Sync-marker insertion

/// Marker value in the first and third slots
pub const MARKER_HIGH: u16 = 0xFFFF;
/// Marker value in the second and fourth slots
pub const MARKER_LOW: u16 = 0x0000;
/// Samples replaced by one marker
pub const MARKER_LEN: u8 = 4;

/// What one sampling interval contributes to the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutput {
    /// Interval dropped while the sync line was held
    Dropped,
    /// Marker slot, replacing the genuine sample
    Marker(u16),
    /// Genuine sample
    Sample(u16),
}

impl GateOutput {
    /// Value to store, if any
    pub fn value(self) -> Option<u16> {
        match self {
            GateOutput::Dropped => None,
            GateOutput::Marker(value) | GateOutput::Sample(value) => Some(value),
        }
    }
}

/// Turns a sync request into the `FFFF 0000 FFFF 0000` bracket.
///
/// While the request is asserted every interval is dropped and the
/// acknowledge line is held high. The four intervals after release carry
/// the marker instead of samples. A new request during the marker restarts
/// it.
#[derive(Debug, Clone, Default)]
pub struct SampleGate {
    remaining: u8,
    acknowledging: bool,
}

impl SampleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one interval's sample
    pub fn process(&mut self, sample: u16, sync_asserted: bool) -> GateOutput {
        if sync_asserted {
            self.acknowledging = true;
            self.remaining = MARKER_LEN;
            return GateOutput::Dropped;
        }
        self.acknowledging = false;

        if self.remaining == 0 {
            return GateOutput::Sample(sample);
        }
        let value = if self.remaining % 2 == 0 {
            MARKER_HIGH
        } else {
            MARKER_LOW
        };
        self.remaining -= 1;
        GateOutput::Marker(value)
    }

    /// Level the acknowledge line should be driven to
    pub fn acknowledging(&self) -> bool {
        self.acknowledging
    }

    /// Marker slots still to emit
    pub fn remaining(&self) -> u8 {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_without_sync() {
        let mut gate = SampleGate::new();
        for sample in [1u16, 2, 0xFFFF, 0] {
            assert_eq!(gate.process(sample, false), GateOutput::Sample(sample));
        }
        assert!(!gate.acknowledging());
    }

    #[test]
    fn test_sync_yields_four_marker_slots() {
        let mut gate = SampleGate::new();
        assert_eq!(gate.process(10, false), GateOutput::Sample(10));
        assert_eq!(gate.process(11, true), GateOutput::Dropped);
        assert!(gate.acknowledging());

        let marker: Vec<_> = (12..16).map(|s| gate.process(s, false)).collect();
        assert_eq!(
            marker,
            vec![
                GateOutput::Marker(MARKER_HIGH),
                GateOutput::Marker(MARKER_LOW),
                GateOutput::Marker(MARKER_HIGH),
                GateOutput::Marker(MARKER_LOW),
            ]
        );
        assert!(!gate.acknowledging());
        assert_eq!(gate.process(16, false), GateOutput::Sample(16));
    }

    #[test]
    fn test_long_assertion_drops_every_interval() {
        let mut gate = SampleGate::new();
        for s in 0..5 {
            assert_eq!(gate.process(s, true), GateOutput::Dropped);
        }
        let values: Vec<_> = (0..5).filter_map(|s| gate.process(s, false).value()).collect();
        assert_eq!(values, vec![MARKER_HIGH, MARKER_LOW, MARKER_HIGH, MARKER_LOW, 4]);
    }

    #[test]
    fn test_reassertion_restarts_marker() {
        let mut gate = SampleGate::new();
        gate.process(0, true);
        gate.process(0, false);
        gate.process(0, false);
        assert_eq!(gate.remaining(), 2);
        gate.process(0, true);
        assert_eq!(gate.remaining(), MARKER_LEN);
    }
}
