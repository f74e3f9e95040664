//! Row queue: durable, at-least-once, unordered delivery of row records.
//!
//! The production implementation is an SQS queue. Delivered messages stay
//! hidden for the visibility window; a consumer that does not delete them in
//! time gets them redelivered.

use crate::config::QueueConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::Client as SqsClient;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// SQS refuses to hand out more than ten messages per receive call
pub const MAX_RECEIVE_BATCH: usize = 10;

/// Errors that can occur while talking to the queue
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to send message to {queue}: {message}")]
    Send { queue: String, message: String },

    #[error("Failed to receive messages from {queue}: {message}")]
    Receive { queue: String, message: String },

    #[error("Failed to delete message {message_id}: {message}")]
    Delete { message_id: String, message: String },
}

/// A message delivered by the queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    /// Queue-assigned message ID
    pub message_id: String,
    /// Handle required to delete this particular delivery
    pub receipt_handle: String,
    /// Opaque payload (a JSON-encoded row record for the catalog queue)
    pub body: String,
}

impl QueueMessage {
    pub fn new(
        message_id: impl Into<String>,
        receipt_handle: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            receipt_handle: receipt_handle.into(),
            body: body.into(),
        }
    }
}

/// Queue operations used by the pipeline handlers and their triggers
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueue one message body
    async fn send(&self, body: String) -> Result<(), QueueError>;

    /// Long-poll for up to `max_messages` messages. Returned messages stay
    /// invisible to other receivers for `visibility`.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge delivered messages so they are never redelivered
    async fn delete(&self, messages: &[QueueMessage]) -> Result<(), QueueError>;
}

/// SQS-backed message queue
pub struct SqsQueue {
    client: SqsClient,
    queue_url: String,
}

impl SqsQueue {
    /// Create a new SQS queue client
    pub async fn new(config: &QueueConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut sqs_config_builder = aws_sdk_sqs::config::Builder::from(&aws_config);

        // Configure custom endpoint for LocalStack/ElasticMQ
        if let Some(ref endpoint_url) = config.endpoint_url {
            sqs_config_builder = sqs_config_builder.endpoint_url(endpoint_url);
        }

        let client = SqsClient::from_conf(sqs_config_builder.build());

        info!(
            queue_url = %config.queue_url,
            region = %config.region,
            "SQS queue client initialized"
        );

        Self {
            client,
            queue_url: config.queue_url.clone(),
        }
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    #[instrument(skip(self, body), fields(size_bytes = body.len()))]
    async fn send(&self, body: String) -> Result<(), QueueError> {
        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::Send {
                queue: self.queue_url.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!(message_id = ?output.message_id(), "Message enqueued");
        metrics::counter!("pipeline.queue.sent").increment(1);

        Ok(())
    }

    #[instrument(skip(self))]
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let max_messages = max_messages.clamp(1, MAX_RECEIVE_BATCH);

        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages as i32)
            .wait_time_seconds(wait.as_secs().min(20) as i32)
            .visibility_timeout(visibility.as_secs() as i32)
            .send()
            .await
            .map_err(|e| QueueError::Receive {
                queue: self.queue_url.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let mut messages = Vec::with_capacity(output.messages().len());

        for message in output.messages() {
            let (Some(message_id), Some(receipt_handle)) =
                (message.message_id(), message.receipt_handle())
            else {
                warn!("Skipping delivery without message ID or receipt handle");
                continue;
            };

            messages.push(QueueMessage::new(
                message_id,
                receipt_handle,
                message.body().unwrap_or_default(),
            ));
        }

        if !messages.is_empty() {
            debug!(count = messages.len(), "Received messages");
        }

        Ok(messages)
    }

    #[instrument(skip(self, messages), fields(count = messages.len()))]
    async fn delete(&self, messages: &[QueueMessage]) -> Result<(), QueueError> {
        let deletions = messages.iter().map(|message| async move {
            self.client
                .delete_message()
                .queue_url(&self.queue_url)
                .receipt_handle(&message.receipt_handle)
                .send()
                .await
                .map_err(|e| QueueError::Delete {
                    message_id: message.message_id.clone(),
                    message: DisplayErrorContext(&e).to_string(),
                })
        });

        futures::future::try_join_all(deletions).await?;

        metrics::counter!("pipeline.queue.deleted").increment(messages.len() as u64);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_message_new() {
        let message = QueueMessage::new("m-1", "rh-1", r#"{"id":"p1"}"#);
        assert_eq!(message.message_id, "m-1");
        assert_eq!(message.receipt_handle, "rh-1");
        assert_eq!(message.body, r#"{"id":"p1"}"#);
    }

    #[test]
    fn test_error_messages_name_the_queue() {
        let error = QueueError::Send {
            queue: "https://sqs.local/rows".to_string(),
            message: "throttled".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to send message to https://sqs.local/rows: throttled"
        );
    }
}
