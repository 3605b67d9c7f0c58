//! Tracing subscriber setup for host processes.
//!
//! The library only emits `tracing` events; hosts call [`init_tracing`] once
//! at startup to see them.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter directives (default: `assembly_kernel=info`)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "assembly_kernel=info";

/// Error installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A global subscriber is already set.
    #[error("Tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable output.
    Pretty,
}

impl LogFormat {
    /// Parse a format name; anything but "pretty" is JSON.
    pub fn parse(name: &str) -> Self {
        if name.eq_ignore_ascii_case("pretty") {
            Self::Pretty
        } else {
            Self::Json
        }
    }

    /// Read `LOG_FORMAT`.
    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }
}

/// Install the global tracing subscriber.
pub fn init_tracing(format: LogFormat) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let result = match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .try_init(),
    };

    result.map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))
}
