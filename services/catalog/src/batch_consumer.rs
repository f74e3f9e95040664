//! Batch consumer for the catalog items queue.
//!
//! [`BatchConsumer::handle_batch`] is one invocation: it decodes every message
//! of the batch, then processes the members concurrently. Each member upserts
//! its item, then its stock row, then publishes a "New Product Created"
//! notification, strictly in that order. Any failure fails the whole batch;
//! writes already applied stay applied.
//!
//! [`BatchTrigger`] feeds the consumer from the queue and acknowledges a batch
//! only when its invocation succeeded within the time budget.

use crate::catalog_store::{CatalogStore, StoreError};
use crate::config::ConsumerConfig;
use crate::product::{normalize, NormalizeError};
use catalog_pipeline::{
    MessageQueue, NotificationEvent, Notifier, NotifyError, QueueError, QueueMessage, RecordError,
    RowRecord,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Pause after a failed poll of the queue
const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Errors that fail a batch
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Message {message_id} has an undecodable body: {source}")]
    Decode {
        message_id: String,
        #[source]
        source: RecordError,
    },

    #[error("Message {message_id} is not a catalog item: {source}")]
    Normalize {
        message_id: String,
        #[source]
        source: NormalizeError,
    },

    #[error("Failed to store catalog item {id}: {source}")]
    Store {
        id: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to publish notification for {id}: {source}")]
    Publish {
        id: String,
        #[source]
        source: NotifyError,
    },

    #[error("Batch did not finish within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Handler for one batch of catalog item messages
pub struct BatchConsumer {
    store: Arc<dyn CatalogStore>,
    notifier: Arc<dyn Notifier>,
}

impl BatchConsumer {
    pub fn new(store: Arc<dyn CatalogStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Process a batch. Returns the number of records processed.
    ///
    /// An undecodable body fails the batch before anything is written.
    #[instrument(skip(self, messages), fields(batch_size = messages.len()))]
    pub async fn handle_batch(&self, messages: &[QueueMessage]) -> Result<usize, BatchError> {
        if messages.is_empty() {
            return Ok(0);
        }

        let records = messages
            .iter()
            .map(|message| {
                RowRecord::from_message_body(&message.body).map_err(|source| BatchError::Decode {
                    message_id: message.message_id.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let members = messages
            .iter()
            .zip(&records)
            .map(|(message, record)| self.process_record(&message.message_id, record));

        // Let every member settle before reporting, so a failure never cuts
        // another member's sequence short.
        let results = futures::future::join_all(members).await;
        let failures = results.iter().filter(|r| r.is_err()).count();

        if let Some(first) = results.into_iter().find_map(Result::err) {
            warn!(failures, "Batch failed");
            metrics::counter!("catalog.batches.failed").increment(1);
            return Err(first);
        }

        metrics::counter!("catalog.records.processed").increment(records.len() as u64);
        info!(records = records.len(), "Batch processed");

        Ok(records.len())
    }

    async fn process_record(&self, message_id: &str, record: &RowRecord) -> Result<(), BatchError> {
        let (item, stock) = normalize(record).map_err(|source| BatchError::Normalize {
            message_id: message_id.to_string(),
            source,
        })?;

        let store_error = |source| BatchError::Store {
            id: item.id.clone(),
            source,
        };
        self.store.upsert_item(&item).await.map_err(store_error)?;
        self.store.upsert_stock(&stock).await.map_err(store_error)?;

        let publish_error = |source| BatchError::Publish {
            id: item.id.clone(),
            source,
        };
        let event = NotificationEvent::new_product(record)
            .map_err(|e| publish_error(NotifyError::from(e)))?;
        self.notifier.publish(&event).await.map_err(publish_error)?;

        debug!(id = %item.id, count = stock.count, "Catalog item processed");

        Ok(())
    }
}

/// Queue polling loop around a [`BatchConsumer`]
pub struct BatchTrigger {
    queue: Arc<dyn MessageQueue>,
    consumer: Arc<BatchConsumer>,
    config: ConsumerConfig,
}

impl BatchTrigger {
    pub fn new(queue: Arc<dyn MessageQueue>, consumer: Arc<BatchConsumer>, config: ConsumerConfig) -> Self {
        Self {
            queue,
            consumer,
            config,
        }
    }

    /// Poll the queue until the task is cancelled
    #[instrument(skip(self))]
    pub async fn run(&self) {
        info!(
            batch_size = self.config.batch_size,
            invocation_timeout_secs = self.config.invocation_timeout_secs,
            "Starting batch trigger"
        );

        loop {
            match self.poll_once().await {
                Ok(_) => {}
                Err(BatchError::Queue(e)) => {
                    error!(error = %e, "Queue operation failed");
                    metrics::counter!("catalog.queue.errors").increment(1);
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                }
                Err(e) => {
                    // Messages stay in flight and are redelivered after the visibility window.
                    error!(error = %e, "Batch invocation failed");
                }
            }
        }
    }

    /// Receive one batch, run the consumer under the invocation timeout and
    /// acknowledge the batch on success
    pub async fn poll_once(&self) -> Result<usize, BatchError> {
        let messages = self
            .queue
            .receive(
                self.config.batch_size,
                self.config.wait_time(),
                self.config.visibility_timeout(),
            )
            .await?;

        if messages.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let budget = self.config.invocation_timeout();
        let processed = tokio::time::timeout(budget, self.consumer.handle_batch(&messages))
            .await
            .map_err(|_| BatchError::Timeout(budget))??;

        self.queue.delete(&messages).await?;

        metrics::histogram!("catalog.batch.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        Ok(processed)
    }
}
