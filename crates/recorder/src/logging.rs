//! Logging setup

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::error::RecorderError;

/// Install the global subscriber at `level` ("error" through "trace")
pub fn init_logging(level: &str) -> Result<(), RecorderError> {
    let level = Level::from_str(level)
        .map_err(|_| RecorderError::Logging(format!("unknown log level '{}'", level)))?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| RecorderError::Logging(e.to_string()))
}
