use catalog_pipeline::QueueConfig;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the import service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// S3 configuration (upload bucket)
    pub s3: S3Config,
    /// Catalog items queue that receives one message per CSV row
    pub queue: QueueConfig,
    /// Upload event queue fed by the bucket's object-created notifications
    pub events: EventsConfig,
    /// CSV ingestion tuning
    #[serde(default)]
    pub ingest: IngestConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
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

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket that receives uploaded CSV files
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Upload event polling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Queue carrying object-created notifications
    #[serde(flatten)]
    pub queue: QueueConfig,
    /// Long-poll wait in seconds
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: u64,
    /// Visibility window for a received notification, in seconds
    #[serde(default = "default_events_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    /// Notifications fetched per poll
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Wall-clock budget for processing one notification, in seconds
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,
}

/// CSV ingestion configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Maximum queue sends in flight for one object
    #[serde(default = "default_max_in_flight_sends")]
    pub max_in_flight_sends: usize,
    /// Parsed rows buffered between the parser and the sender
    #[serde(default = "default_row_buffer")]
    pub row_buffer: usize,
}

/// API configuration for the upload URL endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "import-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_wait_time_secs() -> u64 {
    20
}

fn default_events_visibility_timeout_secs() -> u64 {
    60
}

fn default_max_messages() -> usize {
    10
}

fn default_invocation_timeout_secs() -> u64 {
    30
}

fn default_max_in_flight_sends() -> usize {
    64
}

fn default_row_buffer() -> usize {
    256
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "import-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/import").required(false))
            .add_source(config::File::with_name("/etc/catalog/import").required(false))
            // Override with environment variables
            // IMPORT__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("IMPORT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the handlers cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.s3.bucket.is_empty(), "s3.bucket must be set");
        self.queue.validate()?;
        self.events.queue.validate()?;
        anyhow::ensure!(
            self.ingest.max_in_flight_sends >= 1,
            "ingest.max_in_flight_sends must be at least 1"
        );
        anyhow::ensure!(self.ingest.row_buffer >= 1, "ingest.row_buffer must be at least 1");
        anyhow::ensure!(
            self.events.invocation_timeout_secs < self.events.visibility_timeout_secs,
            "events.invocation_timeout_secs must be below events.visibility_timeout_secs"
        );
        Ok(())
    }

    /// Get the event long-poll wait as Duration
    pub fn events_wait_time(&self) -> Duration {
        Duration::from_secs(self.events.wait_time_secs)
    }

    /// Get the event visibility window as Duration
    pub fn events_visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.events.visibility_timeout_secs)
    }

    /// Get the per-notification processing budget as Duration
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.events.invocation_timeout_secs)
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

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_in_flight_sends: default_max_in_flight_sends(),
            row_buffer: default_row_buffer(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}
