//! # racewire-logging
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` wins over the
//! configured levels when set.

use racewire_settings::{LogFormat, LoggingSettings};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `racewire_source` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            log_level: to_level(settings.level.as_filter_str()),
            module_levels: settings
                .modules
                .iter()
                .map(|(module, level)| (module.clone(), to_level(level.as_filter_str())))
                .collect(),
            format: settings.format,
        }
    }

    /// Filter directives built from the configured levels, e.g.
    /// `info,racewire_source=debug`.
    pub fn directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

fn to_level(s: &str) -> Level {
    s.parse().unwrap_or(Level::INFO)
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directives()));

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .boxed(),
    };

    let _ = tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init();
}
