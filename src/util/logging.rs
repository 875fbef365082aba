//! Logging initialization and configuration.

use crate::config::LogFormat;
use crate::pump::ConsolePump;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the logging system.
///
/// # Arguments
///
/// * `level` - Log level filter (e.g., "info", "debug")
/// * `format` - Stdout format (json or pretty)
/// * `console` - Pump that also receives every formatted line, if any
pub fn init_logging(level: &str, format: &LogFormat, console: Option<ConsolePump>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(console.map(console_layer));

    match format {
        LogFormat::Json => {
            registry
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Pretty => {
            registry
                .with(fmt::layer().pretty())
                .init();
        }
    }
}

/// Formatting layer writing into a [`ConsolePump`].
pub type ConsoleLayer<S> = fmt::Layer<S, DefaultFields, Format, ConsolePump>;

/// Plain-text formatting layer that writes each event into `pump`.
pub fn console_layer<S>(pump: ConsolePump) -> ConsoleLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(pump)
}
