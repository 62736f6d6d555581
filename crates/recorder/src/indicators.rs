//! Host stand-in for the status indicators

use std::time::Duration;

use diagnostics::Indicators;
use tracing::info;

/// Logs indicator changes and sleeps for delays
#[derive(Debug, Default)]
pub struct TracingIndicators {
    primary: bool,
    secondary: bool,
}

impl Indicators for TracingIndicators {
    fn set_primary(&mut self, on: bool) {
        self.primary = on;
        info!(target: "indicator", primary = on, secondary = self.secondary);
    }

    fn set_secondary(&mut self, on: bool) {
        self.secondary = on;
        info!(target: "indicator", primary = self.primary, secondary = on);
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}
