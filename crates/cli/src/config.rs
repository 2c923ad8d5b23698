//! `stagewise.toml` configuration with environment overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;

pub(crate) const DEFAULT_CONFIG_FILE: &str = "stagewise.toml";

pub(crate) const ENV_PORT: &str = "STAGEWISE_PORT";
pub(crate) const ENV_WEBHOOK_URL: &str = "STAGEWISE_WEBHOOK_URL";

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("could not read '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("could not parse '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid holiday '{value}': expected YYYY-MM-DD")]
    Holiday { value: String },
    #[error("invalid {var}='{value}'")]
    Env { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Config {
    pub(crate) server: ServerConfig,
    pub(crate) scheduler: SchedulerConfig,
    pub(crate) notifications: NotificationConfig,
    pub(crate) logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ServerConfig {
    pub(crate) port: u16,
    pub(crate) bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 8080,
            bind: "127.0.0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct SchedulerConfig {
    pub(crate) tick_interval_secs: u64,
    /// Non-working days as `YYYY-MM-DD`.
    pub(crate) holidays: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick_interval_secs: 60,
            holidays: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct NotificationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) webhook_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    pub(crate) filter: String,
    pub(crate) format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Read `path`, or `stagewise.toml` in the working directory. A missing
    /// file yields the defaults. Environment overrides are applied last.
    pub(crate) fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            Config::parse(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?
        } else {
            Config::default()
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.holidays()?;
        Ok(config)
    }

    pub(crate) fn parse(content: &str) -> Result<Config, toml::de::Error> {
        toml::from_str(content)
    }

    pub(crate) fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(ENV_PORT) {
            self.server.port = value.parse().map_err(|_| ConfigError::Env {
                var: ENV_PORT,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(ENV_WEBHOOK_URL) {
            self.notifications.webhook_url = Some(value).filter(|v| !v.is_empty());
        }
        Ok(())
    }

    pub(crate) fn holidays(&self) -> Result<Vec<Date>, ConfigError> {
        let format = format_description!("[year]-[month]-[day]");
        self.scheduler
            .holidays
            .iter()
            .map(|value| {
                Date::parse(value, format).map_err(|_| ConfigError::Holiday {
                    value: value.clone(),
                })
            })
            .collect()
    }

    pub(crate) fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
