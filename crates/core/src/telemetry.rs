//! Tracing helpers shared by the service and the CLI.

use tracing::{Level, Span};

use crate::config::{AppConfig, LogFormat, TelemetryConfig};

const REDACTED: &str = "[redacted]";

/// Runs `make_span` only when tracing is enabled; otherwise the caller gets a
/// disabled span and every `enter`/`record` on it is a no-op.
pub fn scoped_span(enabled: bool, make_span: impl FnOnce() -> Span) -> Span {
    if enabled {
        make_span()
    } else {
        Span::none()
    }
}

/// User or model text as it may appear in span fields and logs.
pub fn content_field<'a>(telemetry: &TelemetryConfig, content: &'a str) -> &'a str {
    if telemetry.record_content {
        content
    } else {
        REDACTED
    }
}

pub fn init_logging(config: &AppConfig) {
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        LogFormat::Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing::info_span;

    use super::{content_field, scoped_span};
    use crate::config::TelemetryConfig;

    #[test]
    fn disabled_tracing_yields_disabled_span_without_building_one() {
        let mut built = false;
        let span = scoped_span(false, || {
            built = true;
            info_span!("chat_interaction")
        });

        assert!(span.is_disabled());
        assert!(!built);
    }

    #[test]
    fn content_is_redacted_unless_recording_is_enabled() {
        let off = TelemetryConfig { enabled: true, record_content: false };
        let on = TelemetryConfig { enabled: true, record_content: true };

        assert_eq!(content_field(&off, "find Furter"), "[redacted]");
        assert_eq!(content_field(&on, "find Furter"), "find Furter");
    }
}
