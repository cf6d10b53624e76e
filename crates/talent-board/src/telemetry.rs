use crate::config::TelemetryConfig;
use std::fmt;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
pub enum TelemetryError {
    EnvFilter { value: String, source: ParseError },
    Subscriber(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::EnvFilter { value, .. } => {
                write!(f, "invalid log filter '{}'", value)
            }
            TelemetryError::Subscriber(err) => write!(f, "failed to install subscriber: {err}"),
        }
    }
}

impl std::error::Error for TelemetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TelemetryError::EnvFilter { source, .. } => Some(source),
            TelemetryError::Subscriber(err) => Some(&**err),
        }
    }
}

/// Installs the global fmt subscriber. `RUST_LOG` wins over the configured level.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => filter_for(&config.log_level)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.show_targets)
        .compact()
        .with_ansi(false)
        .try_init()
        .map_err(TelemetryError::Subscriber)
}

/// Builds a filter from a bare level (`debug`) or a full directive list.
/// Bare levels keep the HTTP stack at `warn` so feed and cache events stay readable.
pub fn filter_for(level: &str) -> Result<EnvFilter, TelemetryError> {
    let trimmed = level.trim();
    let directives = if trimmed.contains('=') || trimmed.contains(',') {
        trimmed.to_string()
    } else {
        format!("{trimmed},hyper=warn,tower_http=warn")
    };

    EnvFilter::try_new(&directives).map_err(|source| TelemetryError::EnvFilter {
        value: level.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_levels_quiet_the_http_stack() {
        let filter = filter_for("debug").expect("level parses");
        let rendered = filter.to_string();
        assert!(rendered.contains("hyper=warn"));
        assert!(rendered.contains("debug"));
    }

    #[test]
    fn explicit_directives_pass_through() {
        let filter = filter_for("talent_board=trace").expect("directive parses");
        assert_eq!(filter.to_string(), "talent_board=trace");
    }

    #[test]
    fn rejects_unparseable_filters() {
        match filter_for("talent_board=verbose") {
            Err(TelemetryError::EnvFilter { value, .. }) => assert_eq!(value, "talent_board=verbose"),
            other => panic!("expected filter error, got {other:?}"),
        }
    }
}
