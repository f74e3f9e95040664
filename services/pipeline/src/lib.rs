//! Catalog Pipeline - shared plumbing for the catalog ingestion pipeline
//!
//! This library holds the pieces both pipeline services agree on:
//!
//! - [`RowRecord`]: one CSV row as an ordered column-name → value mapping,
//!   the body of every queued message
//! - [`MessageQueue`]: the durable, at-least-once row queue (SQS-backed)
//! - [`Notifier`]: the "item processed" fan-out channel (Kafka-backed)
//!
//! Both traits have in-memory implementations in [`memory`] so handlers can be
//! exercised without any external service.
//!
//! # Example
//!
//! ```rust,no_run
//! use catalog_pipeline::{MessageQueue, QueueConfig, RowRecord, SqsQueue};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let queue = SqsQueue::new(&QueueConfig::new("https://sqs.example/queue")).await;
//!     let row = RowRecord::from_pairs([("id", "p1"), ("title", "Widget")]);
//!     queue.send(row.to_message_body()?).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod memory;
pub mod notify;
pub mod queue;
pub mod record;

pub use config::{ConfigError, NotificationConfig, QueueConfig, SecurityProtocol};
pub use memory::{MemoryNotifier, MemoryQueue};
pub use notify::{KafkaNotifier, NotificationEvent, Notifier, NotifyError, NEW_PRODUCT_SUBJECT};
pub use queue::{MessageQueue, QueueError, QueueMessage, SqsQueue};
pub use record::{RecordError, RowRecord};

/// Async trait for queue and notifier implementations (re-export for convenience)
pub use async_trait::async_trait;
