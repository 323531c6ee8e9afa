//! Observability utilities.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::logs::{LogBuffer, LogBufferLayer};

/// Environment variable selecting the console log format.
pub const LOG_FORMAT_ENV: &str = "MASTER_LOG_FORMAT";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// `json` (any case) selects JSON; anything else, or nothing, is compact text.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Initialize tracing once for the process.
///
/// Filter defaults to `info` if `RUST_LOG` is unset. Every event that passes
/// the filter goes to stdout and is also copied into `buffer`, which backs the
/// master log endpoints.
pub fn init_tracing(buffer: &LogBuffer) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let format = LogFormat::from_env_value(std::env::var(LOG_FORMAT_ENV).ok().as_deref());
        let console = match format {
            LogFormat::Json => fmt::layer().json().boxed(),
            LogFormat::Compact => fmt::layer().compact().boxed(),
        };

        let result = tracing_subscriber::registry()
            .with(console)
            .with(LogBufferLayer::new(buffer.clone()))
            .with(filter)
            .try_init();

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_env_value() {
        assert_eq!(LogFormat::from_env_value(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::from_env_value(Some("text")), LogFormat::Compact);
        assert_eq!(LogFormat::from_env_value(None), LogFormat::Compact);
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        let buffer = LogBuffer::new(16);
        init_tracing(&buffer);
        init_tracing(&buffer);
    }
}
