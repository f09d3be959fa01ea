//! Process-wide `tracing` subscriber setup.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingSection};

/// Build the filter: `RUST_LOG` wins, then `--verbose`, then the configured
/// level.
pub fn build_filter(config: &LoggingSection, verbose: bool) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = if verbose { "debug" } else { config.level.as_str() };
    EnvFilter::try_new(level)
        .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", level, e))
}

/// Install the global subscriber. Calling this twice is harmless; the second
/// call leaves the first subscriber in place.
pub fn init_logging(config: &LoggingSection, verbose: bool) -> Result<()> {
    let filter = build_filter(config, verbose)?;

    let installed = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
            .is_ok(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .json()
            .try_init()
            .is_ok(),
    };

    if !installed {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingSection {
            level: "taskboard=loudest".to_string(),
            format: LogFormat::Pretty,
        };
        assert!(build_filter(&config, false).is_err());
    }

    #[test]
    fn test_verbose_overrides_configured_level() {
        let config = LoggingSection {
            level: "taskboard=loudest".to_string(),
            format: LogFormat::Json,
        };
        // `--verbose` replaces the configured directive entirely.
        assert!(build_filter(&config, true).is_ok());
    }

    #[test]
    fn test_init_twice_is_ok() {
        let config = LoggingSection::default();
        assert!(init_logging(&config, false).is_ok());
        assert!(init_logging(&config, false).is_ok());
    }
}
