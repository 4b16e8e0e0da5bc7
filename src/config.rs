use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between two registry ticks.
    pub tick_interval_ms: u64,
    /// Upper bound on scraper runs executing at the same time.
    pub max_running_jobs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    /// Built-in defaults, then `config/default.toml` (or `path`), then
    /// `SHELFWATCH__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("database.url", "sqlite://shelfwatch.db?mode=rwc")?
            .set_default("database.max_connections", 5)?
            .set_default("database.min_connections", 1)?
            .set_default("database.acquire_timeout", 30)?
            .set_default("http.user_agent", concat!("Shelfwatch/", env!("CARGO_PKG_VERSION")))?
            .set_default("http.connect_timeout_secs", 10)?
            .set_default("scheduler.tick_interval_ms", 1000)?
            .set_default("scheduler.max_running_jobs", 4)?
            .set_default("logging.filter", "shelfwatch=info")?
            .set_default("metrics.enabled", false)?
            .set_default("metrics.port", 9001)?;

        builder = match path {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name("config/default").required(false)),
        };

        let config: AppConfig = builder
            .add_source(Environment::with_prefix("SHELFWATCH").separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(ConfigError::Message("Database url must be a sqlite: url".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message("Database max_connections must be greater than 0".into()));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Message("Database min_connections cannot exceed max_connections".into()));
        }

        if self.http.user_agent.trim().is_empty() {
            return Err(ConfigError::Message("HTTP user_agent must not be empty".into()));
        }

        if self.http.connect_timeout_secs == 0 {
            return Err(ConfigError::Message("HTTP connect_timeout_secs must be greater than 0".into()));
        }

        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::Message("Scheduler tick_interval_ms must be greater than 0".into()));
        }

        if self.scheduler.max_running_jobs == 0 {
            return Err(ConfigError::Message("Scheduler max_running_jobs must be greater than 0".into()));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message("Metrics port must be greater than 0".into()));
        }

        Ok(())
    }
}
