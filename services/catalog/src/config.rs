use catalog_pipeline::{ConfigError, NotificationConfig, QueueConfig};
use serde::Deserialize;
use std::time::Duration;

/// Largest batch a single receive can deliver
pub const MAX_BATCH_SIZE: usize = 10;

/// Main configuration for the catalog service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Catalog items queue
    pub queue: QueueConfig,
    /// Batch consumer configuration
    #[serde(default)]
    pub consumer: ConsumerConfig,
    /// Notification channel configuration
    pub notifications: NotificationConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Batch consumer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Messages handed to one invocation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Long-poll wait in seconds
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: u64,
    /// Visibility window for a received batch, in seconds
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    /// Wall-clock budget for one invocation, in seconds
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "catalog-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_batch_size() -> usize {
    5
}

fn default_wait_time_secs() -> u64 {
    20
}

fn default_visibility_timeout_secs() -> u64 {
    30
}

fn default_invocation_timeout_secs() -> u64 {
    5
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "catalog-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9091)?
            // Add config file if present
            .add_source(config::File::with_name("config/catalog").required(false))
            .add_source(config::File::with_name("/etc/catalog/catalog").required(false))
            // Override with environment variables
            // CATALOG__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("CATALOG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the consumer cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.database.url.is_empty(), "database.url must be set");
        self.queue.validate()?;
        self.consumer.validate()?;
        self.notifications.validate()?;
        Ok(())
    }
}

impl DatabaseConfig {
    /// Get the pool acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get the idle connection timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(ConfigError::InvalidValue {
                key: "consumer.batch_size".to_string(),
                message: format!(
                    "must be between 1 and {MAX_BATCH_SIZE}, got {}",
                    self.batch_size
                ),
            });
        }
        if self.invocation_timeout_secs >= self.visibility_timeout_secs {
            return Err(ConfigError::InvalidValue {
                key: "consumer.invocation_timeout_secs".to_string(),
                message: format!(
                    "must be below consumer.visibility_timeout_secs ({})",
                    self.visibility_timeout_secs
                ),
            });
        }
        Ok(())
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            wait_time_secs: default_wait_time_secs(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            invocation_timeout_secs: default_invocation_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_defaults() {
        let consumer = ConsumerConfig::default();
        assert_eq!(consumer.batch_size, 5);
        assert_eq!(consumer.invocation_timeout(), Duration::from_secs(5));
        assert!(consumer.validate().is_ok());
    }

    #[test]
    fn test_batch_size_bounds() {
        let mut consumer = ConsumerConfig::default();

        consumer.batch_size = 0;
        assert!(matches!(
            consumer.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "consumer.batch_size"
        ));

        consumer.batch_size = MAX_BATCH_SIZE + 1;
        assert!(consumer.validate().is_err());

        consumer.batch_size = MAX_BATCH_SIZE;
        assert!(consumer.validate().is_ok());
    }

    #[test]
    fn test_invocation_must_end_within_visibility() {
        let mut consumer = ConsumerConfig::default();
        consumer.invocation_timeout_secs = consumer.visibility_timeout_secs;

        assert!(matches!(
            consumer.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "consumer.invocation_timeout_secs"
        ));
    }

    #[test]
    fn test_database_timeouts() {
        let database: DatabaseConfig =
            serde_json::from_str(r#"{"url":"postgres://localhost/catalog","idle_timeout_secs":120}"#)
                .unwrap();

        assert_eq!(database.connect_timeout(), Duration::from_secs(30));
        assert_eq!(database.idle_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_validate_requires_database_url() {
        let config = Config {
            service: ServiceConfig::default(),
            database: DatabaseConfig {
                url: String::new(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout_secs(),
                idle_timeout_secs: default_idle_timeout_secs(),
                run_migrations: false,
            },
            queue: QueueConfig::new("http://localhost:4566/000000000000/catalog-items"),
            consumer: ConsumerConfig::default(),
            notifications: NotificationConfig::default(),
        };

        assert!(config.validate().is_err());
    }
}
