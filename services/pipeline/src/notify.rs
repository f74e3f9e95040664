//! Notification channel for "item processed" events.
//!
//! Notifications are fire-and-forget fan-out: one event per successfully
//! processed row, published to a Kafka topic. The subject travels as the
//! `subject` header, the body is the pretty-printed original record.

use crate::config::NotificationConfig;
use crate::record::{RecordError, RowRecord};
use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Subject attached to every catalog item notification
pub const NEW_PRODUCT_SUBJECT: &str = "New Product Created";

/// Errors that can occur while publishing a notification
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to create notification producer: {0}")]
    CreationError(String),

    #[error("Failed to encode notification: {0}")]
    Encode(#[from] RecordError),

    #[error("Failed to publish notification to {topic}: {message}")]
    PublishError { topic: String, message: String },
}

/// An "item processed" event
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    /// Fixed subject line
    pub subject: String,
    /// Pretty-printed JSON of the full original record
    pub message: String,
    /// Partitioning key (the item id when known)
    pub key: Option<String>,
}

impl NotificationEvent {
    /// Build the "New Product Created" event for a processed record
    pub fn new_product(record: &RowRecord) -> Result<Self, RecordError> {
        Ok(Self {
            subject: NEW_PRODUCT_SUBJECT.to_string(),
            message: record.to_pretty_json()?,
            key: record.get_str("id").map(str::to_string),
        })
    }
}

/// Publish side of the notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, event: &NotificationEvent) -> Result<(), NotifyError>;
}

/// Kafka-backed notifier
pub struct KafkaNotifier {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaNotifier {
    /// Create a new notifier with the given configuration
    pub fn new(config: &NotificationConfig) -> Result<Self, NotifyError> {
        info!(
            bootstrap_servers = %config.bootstrap_servers,
            topic = %config.topic,
            "Creating Kafka notification producer"
        );

        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| NotifyError::CreationError(e.to_string()))?;

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            timeout: config.message_timeout(),
        })
    }

    /// Flush all pending notifications
    pub fn flush(&self, timeout: Duration) {
        if let Err(e) = self.producer.flush(Timeout::After(timeout)) {
            warn!(error = %e, "Failed to flush notification producer");
        }
    }
}

#[async_trait]
impl Notifier for KafkaNotifier {
    #[instrument(skip(self, event), fields(topic = %self.topic, key = ?event.key))]
    async fn publish(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let headers = OwnedHeaders::new().insert(Header {
            key: "subject",
            value: Some(event.subject.as_str()),
        });

        let mut record = FutureRecord::to(&self.topic)
            .payload(&event.message)
            .headers(headers);

        if let Some(ref key) = event.key {
            record = record.key(key);
        }

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(e, _)| NotifyError::PublishError {
                topic: self.topic.clone(),
                message: e.to_string(),
            })?;

        debug!(partition, offset, "Notification delivered");
        metrics::counter!("pipeline.notifications.published").increment(1);

        Ok(())
    }
}

impl Drop for KafkaNotifier {
    fn drop(&mut self) {
        info!("Shutting down notification producer");
        self.flush(Duration::from_secs(5));
    }
}
