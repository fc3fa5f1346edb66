//! Logging setup for the harness.

use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, multi-field lines.
    #[default]
    Pretty,
    /// One short line per event.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Show file and line for each event.
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Pretty,
            include_location: false,
        }
    }
}

impl LogConfig {
    /// Map `-v` occurrences onto a level: none is warn, three or more is trace.
    pub fn from_verbosity(verbose: u8, format: LogFormat) -> Self {
        let level = match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self {
            level,
            format,
            include_location: level >= Level::DEBUG,
        }
    }

    /// Directive used when `RUST_LOG` is unset. Dependencies stay at warn.
    pub fn default_directive(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        format!("warn,schedkit_sw={level},schedkit_net={level},sw_harness={level}")
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the verbosity flags.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let registry = tracing_subscriber::registry().with(filter);
    let writer = std::io::stderr;

    match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(writer).with_target(true))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer))
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(LogConfig::from_verbosity(0, LogFormat::Pretty).level, Level::WARN);
        assert_eq!(LogConfig::from_verbosity(1, LogFormat::Pretty).level, Level::INFO);
        assert_eq!(LogConfig::from_verbosity(2, LogFormat::Pretty).level, Level::DEBUG);
        assert_eq!(LogConfig::from_verbosity(9, LogFormat::Json).level, Level::TRACE);
    }

    #[test]
    fn test_location_only_when_debugging() {
        assert!(!LogConfig::from_verbosity(1, LogFormat::Pretty).include_location);
        assert!(LogConfig::from_verbosity(2, LogFormat::Pretty).include_location);
    }

    #[test]
    fn test_default_directive() {
        let directive = LogConfig::from_verbosity(2, LogFormat::Compact).default_directive();
        assert_eq!(
            directive,
            "warn,schedkit_sw=debug,schedkit_net=debug,sw_harness=debug"
        );
        assert!(EnvFilter::try_new(directive).is_ok());
    }
}
