//! Structured logging setup.
//!
//! Uses `tracing` with a `tracing-subscriber` fmt layer. The filter comes
//! from `RUST_LOG` when set, otherwise from the configured default level,
//! so a deployment can turn on `debug` SCPI traffic logging without
//! touching the config file.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{AppResult, FmError};

/// Initialize the global tracing subscriber.
///
/// `default_level` is any `EnvFilter` directive, typically just a level
/// name like `info`. Call once at startup.
pub fn init(default_level: &str) -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| FmError::Configuration(format!("invalid log level '{default_level}': {e}")))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| FmError::Configuration(format!("failed to initialize tracing: {e}")))?;

    Ok(())
}
