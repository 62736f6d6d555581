//! Data Logger Recorder
//!
//! Ties the pieces together: brings the card up, opens the multi-block
//! session, feeds the ring from the sampling timer and drains it block by
//! block. Fatal conditions map onto the blink diagnostics.

mod config;
mod error;
mod indicators;
mod logging;
mod recorder;
mod session;

pub use config::{MemoryKind, RecorderConfig, ENV_PREFIX};
pub use error::RecorderError;
pub use indicators::TracingIndicators;
pub use logging::init_logging;
pub use recorder::{bring_up_card, Recorder, RecordingSummary};
pub use session::run_session;
