use std::{fmt::Display, str::FromStr};

use tracing::{debug, error, info, trace, warn};

use super::{Next, Plugin, PluginError};
use crate::{config::Config, error::Result, event::Event, subscription::Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::EnumString, strum::Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogLevel {
    Trace,
    #[default]
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn log(self, message: &str) {
        match self {
            LogLevel::Trace => trace!("{}", message),
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Warn => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
    }
}

/// Logs every delivery step.
///
/// Settings (`plugins.logging.*`):
/// - `level`: level of the progress lines, `debug` by default
/// - `log_errors`: log failures of the wrapped operation before passing them on
#[derive(Debug, Clone)]
pub struct LoggingPlugin {
    level: LogLevel,
    log_errors: bool,
}

impl LoggingPlugin {
    pub fn new(level: LogLevel, log_errors: bool) -> Self {
        Self { level, log_errors }
    }

    pub fn from_config(config: &Config) -> std::result::Result<Self, PluginError> {
        let level = match config.value("level") {
            None => LogLevel::default(),
            Some(value) if value.is_null() => LogLevel::default(),
            Some(value) => value
                .as_str()
                .and_then(|level| LogLevel::from_str(level).ok())
                .ok_or_else(|| PluginError::InvalidLevel(value.describe()))?,
        };
        let log_errors = config.get_bool("log_errors").unwrap_or(true);
        Ok(Self::new(level, log_errors))
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    fn run(&self, subject: &str, object: &dyn Display, next: Next<'_>) -> Result<()> {
        self.level.log(&format!("{subject}: {object}"));

        let result = next.run();
        if let Err(e) = &result {
            if self.log_errors {
                error!(
                    "Error raised when {} {}: {}",
                    subject.to_lowercase(),
                    object,
                    e
                );
            }
            return result;
        }

        self.level.log(&format!("Finished {subject}: {object}"));
        result
    }
}

impl Default for LoggingPlugin {
    fn default() -> Self {
        Self::new(LogLevel::default(), true)
    }
}

impl Plugin for LoggingPlugin {
    fn name(&self) -> &str {
        "logging"
    }

    fn around_publish(&self, event: &Event, next: Next<'_>) -> Result<()> {
        self.run("Publishing", event, next)
    }

    fn around_queue_publish(&self, event: &Event, next: Next<'_>) -> Result<()> {
        self.run("Publishing on Queue", event, next)
    }

    fn around_subscription(
        &self,
        subscription: &Subscription,
        _event: &Event,
        next: Next<'_>,
    ) -> Result<()> {
        self.run("Executing Subscription", subscription, next)
    }
}
