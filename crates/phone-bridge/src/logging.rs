//! Log output for applications embedding the phone bridge
//!
//! The bridge logs from three kinds of threads: the GUI thread pumping the
//! phone, the `sip-worker` thread running stack tasks, and the stack's own
//! callback and media threads. Thread names are always printed so records
//! from the three can be told apart.
//!
//! [`LoggingConfig`] is usually loaded as the `[logging]` table of a
//! [`PhoneConfig`](crate::config::PhoneConfig):
//!
//! ```toml
//! [logging]
//! bridge_level = "debug"
//! default_level = "warn"
//! directives = ["rvoip_phone_bridge::render=trace"]
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{PhoneError, PhoneResult};

/// Target prefix of every record the bridge emits
pub const BRIDGE_TARGET: &str = "rvoip_phone_bridge";

/// Filters and output format of the global subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level of the bridge's own records
    pub bridge_level: String,
    /// Level of every other target
    pub default_level: String,
    /// Additional `EnvFilter` directives, applied last
    pub directives: Vec<String>,
    /// One JSON object per record
    pub json: bool,
    /// Include source file and line
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            bridge_level: "info".to_string(),
            default_level: "warn".to_string(),
            directives: Vec::new(),
            json: false,
            source_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_bridge_level(mut self, level: LevelFilter) -> Self {
        self.bridge_level = level.to_string().to_ascii_lowercase();
        self
    }

    pub fn with_default_level(mut self, level: LevelFilter) -> Self {
        self.default_level = level.to_string().to_ascii_lowercase();
        self
    }

    /// Add a directive such as `rvoip_phone_bridge::worker=trace`
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_source_location(mut self) -> Self {
        self.source_location = true;
        self
    }

    /// Filter in `RUST_LOG` syntax: default level, bridge level, then extras
    pub fn filter_directives(&self) -> PhoneResult<String> {
        let default_level = parse_log_level(&self.default_level)?;
        let bridge_level = parse_log_level(&self.bridge_level)?;
        let mut directives = vec![
            default_level.to_string().to_ascii_lowercase(),
            format!("{}={}", BRIDGE_TARGET, bridge_level.to_string().to_ascii_lowercase()),
        ];
        directives.extend(self.directives.iter().map(|d| d.trim().to_string()));
        Ok(directives.join(","))
    }

    /// Reject levels and directives the filter cannot parse
    pub fn validate(&self) -> PhoneResult<()> {
        self.env_filter().map(|_| ())
    }

    fn env_filter(&self) -> PhoneResult<EnvFilter> {
        let directives = self.filter_directives()?;
        EnvFilter::try_new(&directives)
            .map_err(|e| PhoneError::config(format!("Invalid log filter '{}': {}", directives, e)))
    }
}

/// Parse a level name such as `debug` or `OFF`
pub fn parse_log_level(level: &str) -> PhoneResult<LevelFilter> {
    LevelFilter::from_str(level.trim()).map_err(|_| PhoneError::config(format!("Invalid log level: {}", level)))
}

/// Install the global subscriber
///
/// A non-empty `RUST_LOG` replaces the configured filter. Fails if a global
/// subscriber is already installed.
pub fn setup_logging(config: &LoggingConfig) -> PhoneResult<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(env) if !env.trim().is_empty() => EnvFilter::try_new(&env)
            .map_err(|e| PhoneError::config(format!("Invalid {}: {}", EnvFilter::DEFAULT_ENV, e)))?,
        _ => config.env_filter()?,
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_file(config.source_location)
        .with_line_number(config.source_location);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| PhoneError::config(format!("Failed to install log subscriber: {}", e)))?;

    info!(version = crate::VERSION, json = config.json, "Phone bridge logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_favours_bridge_records() {
        let directives = LoggingConfig::default().filter_directives().unwrap();
        assert_eq!(directives, "warn,rvoip_phone_bridge=info");
    }

    #[test]
    fn test_levels_and_directives_combined() {
        let config = LoggingConfig::default()
            .with_bridge_level(LevelFilter::DEBUG)
            .with_default_level(LevelFilter::ERROR)
            .with_directive("rvoip_phone_bridge::render=trace");
        assert_eq!(
            config.filter_directives().unwrap(),
            "error,rvoip_phone_bridge=debug,rvoip_phone_bridge::render=trace"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_level_rejected() {
        assert_eq!(parse_log_level("WARN").unwrap(), LevelFilter::WARN);
        let config = LoggingConfig {
            bridge_level: "chatty".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PhoneError::Configuration { .. })));
    }

    #[test]
    fn test_invalid_directive_rejected() {
        let config = LoggingConfig::default().with_directive("rvoip_phone_bridge=loud");
        assert!(matches!(config.validate(), Err(PhoneError::Configuration { .. })));
    }
}
