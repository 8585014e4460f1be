//! Process-wide tracing setup for binaries embedding the service.

use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("A global tracing subscriber is already installed: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("A global logger is already installed: {0}")]
    Logger(#[from] log::SetLoggerError),
}

/// `RUST_LOG` when set, otherwise `default_directives`.
pub fn build_filter(default_directives: &str) -> Result<EnvFilter, ParseError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directives),
    }
}

/// Installs the global subscriber and routes `log` records into it.
///
/// Call once at startup. `default_directives` is usually `"info"`.
pub fn init_tracing(default_directives: &str, json: bool) -> Result<(), TelemetryError> {
    let filter = build_filter(default_directives)?;

    if json {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true));
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(filter).with(fmt::layer());
        tracing::subscriber::set_global_default(subscriber)?;
    }

    tracing_log::LogTracer::init()?;
    Ok(())
}
