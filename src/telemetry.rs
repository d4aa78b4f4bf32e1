//! Tracing initialization for binaries and test harnesses embedding the
//! engine. Library code only emits events; installing a subscriber is
//! always the embedder's decision.

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::{EngineError, EngineResult};

/// Install a global tracing subscriber per the logging configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_telemetry(config: &LoggingConfig) -> EngineResult<()> {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if config.format == "json" {
        let formatter = fmt::layer().json().with_target(true);
        Box::new(Registry::default().with(filter).with(formatter))
    } else {
        let formatter = fmt::layer().with_target(true);
        Box::new(Registry::default().with(filter).with(formatter))
    };

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        EngineError::ConfigurationError {
            reason: format!("failed to set global subscriber: {e}"),
        }
    })
}
