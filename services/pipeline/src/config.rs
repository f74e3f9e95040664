//! Configuration for the row queue and the notification channel.
//!
//! Both services embed these structures in their own configuration trees, so
//! they only describe how to reach the external service, not how a particular
//! service polls it.

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// SQS queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Full queue URL
    pub queue_url: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for LocalStack, ElasticMQ, etc.)
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl QueueConfig {
    /// Create a queue configuration for the given URL with default region
    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            region: default_region(),
            endpoint_url: None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired("queue_url".to_string()));
        }
        Ok(())
    }
}

/// Security protocol for Kafka connections
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::Ssl => "ssl",
            SecurityProtocol::SaslPlaintext => "sasl_plaintext",
            SecurityProtocol::SaslSsl => "sasl_ssl",
        }
    }

    fn uses_sasl(&self) -> bool {
        matches!(self, SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl)
    }
}

/// Notification channel (Kafka topic) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Comma-separated list of broker addresses
    pub bootstrap_servers: String,
    /// Topic that receives "item processed" notifications
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Client ID for this connection
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Delivery timeout for a single publish, in milliseconds
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    /// Security protocol
    #[serde(default)]
    pub security_protocol: SecurityProtocol,
    /// SASL username (PLAIN mechanism)
    pub sasl_username: Option<String>,
    /// SASL password (PLAIN mechanism)
    pub sasl_password: Option<String>,
    /// Additional Kafka properties
    #[serde(default)]
    pub extra_properties: HashMap<String, String>,
}

fn default_topic() -> String {
    "catalog.products.created".to_string()
}

fn default_client_id() -> String {
    "catalog-service".to_string()
}

fn default_message_timeout_ms() -> u64 {
    5000
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            topic: default_topic(),
            client_id: default_client_id(),
            message_timeout_ms: default_message_timeout_ms(),
            security_protocol: SecurityProtocol::default(),
            sasl_username: None,
            sasl_password: None,
            extra_properties: HashMap::new(),
        }
    }
}

impl NotificationConfig {
    /// Build a producer ClientConfig
    pub fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();

        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("client.id", &self.client_id);
        config.set("security.protocol", self.security_protocol.as_str());
        config.set("message.timeout.ms", self.message_timeout_ms.to_string());
        config.set("acks", "all");
        config.set("enable.idempotence", "true");

        if self.security_protocol.uses_sasl() {
            config.set("sasl.mechanism", "PLAIN");
            if let Some(ref username) = self.sasl_username {
                config.set("sasl.username", username);
            }
            if let Some(ref password) = self.sasl_password {
                config.set("sasl.password", password);
            }
        }

        for (key, value) in &self.extra_properties {
            config.set(key, value);
        }

        config
    }

    /// Get the per-publish delivery timeout as Duration
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bootstrap_servers.is_empty() {
            return Err(ConfigError::MissingRequired(
                "bootstrap_servers".to_string(),
            ));
        }

        if self.topic.is_empty() {
            return Err(ConfigError::MissingRequired("topic".to_string()));
        }

        if self.security_protocol.uses_sasl() && self.sasl_username.is_none() {
            return Err(ConfigError::MissingRequired(
                "sasl_username (required for SASL)".to_string(),
            ));
        }

        Ok(())
    }
}
