use ingest::config::{Config as IngestConfig, ValidationError};
use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    pub sentry_dsn: Option<String>,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_level(),
            sentry_dsn: None,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub metrics: Option<MetricsConfig>,
    #[serde(flatten)]
    pub ingest: IngestConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data: Config = serde_yaml::from_reader(file)?;
        data.validate()?;

        Ok(data)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(metrics) = &self.metrics
            && metrics.statsd_port == 0
        {
            return Err(ConfigError::InvalidStatsdPort);
        }
        self.ingest.validate()?;
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
    #[error("statsd port cannot be 0")]
    InvalidStatsdPort,
}
