use crate::csv_ingest::{IngestError, IngestionWorker, ObjectReport};
use catalog_pipeline::{MessageQueue, QueueError, QueueMessage};
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Key prefix under which client uploads land
pub const UPLOAD_PREFIX: &str = "uploaded/";

/// Pause after a failed poll of the event queue
const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Errors raised while handling one object-created notification
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Invalid storage event: {0}")]
    InvalidEvent(#[from] serde_json::Error),

    #[error("Object key {key} is not valid percent-encoded UTF-8")]
    InvalidKey { key: String },

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Ingestion did not finish within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Object-created notification as delivered by the bucket
#[derive(Debug, Clone, Deserialize)]
pub struct S3EventNotification {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3EventRecord {
    #[serde(rename = "eventName", default)]
    pub event_name: Option<String>,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Object {
    /// URL-encoded object key
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Location of one uploaded object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObjectRef {
    pub bucket: String,
    pub key: String,
}

/// Decode an event object key: `+` is a space, then percent-decoding applies
pub fn decode_object_key(raw: &str) -> Result<String, TriggerError> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|_| TriggerError::InvalidKey {
            key: raw.to_string(),
        })
}

impl S3EventNotification {
    pub fn from_json(body: &str) -> Result<Self, TriggerError> {
        Ok(serde_json::from_str(body)?)
    }

    /// Uploaded objects referenced by this notification, one entry per
    /// record.
    ///
    /// Records for other event types or keys outside [`UPLOAD_PREFIX`] are
    /// skipped. A key that does not decode yields an error entry without
    /// affecting the other records.
    pub fn uploaded_objects(&self) -> Vec<Result<StorageObjectRef, TriggerError>> {
        let mut objects = Vec::with_capacity(self.records.len());

        for record in &self.records {
            if let Some(ref event_name) = record.event_name {
                if !event_name.starts_with("ObjectCreated") {
                    debug!(event_name = %event_name, "Skipping non-create event");
                    continue;
                }
            }

            let key = match decode_object_key(&record.s3.object.key) {
                Ok(key) => key,
                Err(e) => {
                    objects.push(Err(e));
                    continue;
                }
            };
            if !key.starts_with(UPLOAD_PREFIX) {
                warn!(key = %key, "Skipping object outside the upload prefix");
                continue;
            }

            objects.push(Ok(StorageObjectRef {
                bucket: record.s3.bucket.name.clone(),
                key,
            }));
        }

        objects
    }
}

/// Polling settings for the event queue
#[derive(Debug, Clone)]
pub struct TriggerSettings {
    pub max_messages: usize,
    pub wait_time: Duration,
    pub visibility_timeout: Duration,
    pub invocation_timeout: Duration,
}

/// Drives the ingestion worker from the bucket's object-created notifications.
///
/// Each notification is one invocation. It is deleted from the event queue
/// only when every object it names was ingested; otherwise it becomes visible
/// again after the visibility window and the invocation is retried.
pub struct StorageEventTrigger {
    events: Arc<dyn MessageQueue>,
    worker: Arc<IngestionWorker>,
    settings: TriggerSettings,
}

impl StorageEventTrigger {
    pub fn new(
        events: Arc<dyn MessageQueue>,
        worker: Arc<IngestionWorker>,
        settings: TriggerSettings,
    ) -> Self {
        Self {
            events,
            worker,
            settings,
        }
    }

    /// Poll the event queue until the task is cancelled
    #[instrument(skip(self))]
    pub async fn run(&self) {
        info!(
            max_messages = self.settings.max_messages,
            invocation_timeout_secs = self.settings.invocation_timeout.as_secs(),
            "Starting storage event trigger"
        );

        loop {
            if let Err(e) = self.poll_once().await {
                error!(error = %e, "Failed to poll storage events");
                metrics::counter!("import.events.poll_errors").increment(1);
                tokio::time::sleep(POLL_RETRY_DELAY).await;
            }
        }
    }

    /// Receive one round of notifications and invoke them concurrently.
    ///
    /// Every invocation of the round runs within one `invocation_timeout`,
    /// which stays inside the visibility window of the whole round.
    pub async fn poll_once(&self) -> Result<PollSummary, QueueError> {
        let messages = self
            .events
            .receive(
                self.settings.max_messages,
                self.settings.wait_time,
                self.settings.visibility_timeout,
            )
            .await?;

        let outcomes =
            futures::future::join_all(messages.iter().map(|message| self.invoke(message))).await;

        let mut summary = PollSummary::default();
        for (message, outcome) in messages.iter().zip(outcomes) {
            match outcome {
                Ok(reports) => {
                    summary.processed += 1;
                    metrics::counter!("import.events.processed").increment(1);
                    debug!(
                        message_id = %message.message_id,
                        objects = reports.len(),
                        "Storage event processed"
                    );
                }
                Err(e) => {
                    // Left undeleted; redelivered after the visibility window.
                    summary.failed += 1;
                    error!(
                        message_id = %message.message_id,
                        error = %e,
                        "Failed to process storage event"
                    );
                    metrics::counter!("import.events.failed").increment(1);
                }
            }
        }

        Ok(summary)
    }

    /// Handle one notification and acknowledge it on success.
    ///
    /// A record with an undecodable key fails the notification, but only
    /// after the notification's other objects were ingested.
    #[instrument(skip(self, message), fields(message_id = %message.message_id))]
    pub async fn invoke(&self, message: &QueueMessage) -> Result<Vec<ObjectReport>, TriggerError> {
        let event = S3EventNotification::from_json(&message.body)?;

        let mut objects = Vec::new();
        let mut rejected = Vec::new();
        for entry in event.uploaded_objects() {
            match entry {
                Ok(object) => objects.push(object),
                Err(e) => {
                    warn!(error = %e, "Skipping record with invalid object key");
                    rejected.push(e);
                }
            }
        }

        let reports = if objects.is_empty() {
            debug!("Storage event names no uploaded objects");
            Vec::new()
        } else {
            tokio::time::timeout(
                self.settings.invocation_timeout,
                self.worker.process_objects(&objects),
            )
            .await
            .map_err(|_| TriggerError::Timeout(self.settings.invocation_timeout))??
        };

        if let Some(first) = rejected.into_iter().next() {
            return Err(first);
        }

        self.events.delete(std::slice::from_ref(message)).await?;

        Ok(reports)
    }
}

/// Outcome of one poll of the event queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub processed: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::object_store::{MemoryObjectStore, ObjectReader, ObjectStore, ObjectStoreError};
    use async_trait::async_trait;
    use catalog_pipeline::MemoryQueue;
    use tokio::sync::Barrier;

    fn event_body(records: &[(&str, &str)]) -> String {
        let records: Vec<serde_json::Value> = records
            .iter()
            .map(|(bucket, key)| {
                serde_json::json!({
                    "eventName": "ObjectCreated:Put",
                    "s3": {
                        "bucket": { "name": bucket },
                        "object": { "key": key, "size": 42 }
                    }
                })
            })
            .collect();
        serde_json::json!({ "Records": records }).to_string()
    }

    fn settings() -> TriggerSettings {
        TriggerSettings {
            max_messages: 10,
            wait_time: Duration::ZERO,
            visibility_timeout: Duration::from_secs(60),
            invocation_timeout: Duration::from_secs(5),
        }
    }

    struct Harness {
        store: Arc<MemoryObjectStore>,
        rows: Arc<MemoryQueue>,
        events: Arc<MemoryQueue>,
        trigger: StorageEventTrigger,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryObjectStore::new());
        let rows = Arc::new(MemoryQueue::new());
        let events = Arc::new(MemoryQueue::new());
        let worker = Arc::new(IngestionWorker::new(
            store.clone(),
            rows.clone(),
            IngestConfig::default(),
        ));
        let trigger = StorageEventTrigger::new(events.clone(), worker, settings());
        Harness {
            store,
            rows,
            events,
            trigger,
        }
    }

    async fn deliver(events: &MemoryQueue, body: String) -> QueueMessage {
        events.send(body).await.unwrap();
        let mut delivered = events
            .receive(1, Duration::ZERO, Duration::from_secs(60))
            .await
            .unwrap();
        delivered.remove(0)
    }

    #[test]
    fn test_decode_object_key() {
        assert_eq!(
            decode_object_key("uploaded/spring+sale%282026%29.csv").unwrap(),
            "uploaded/spring sale(2026).csv"
        );
        assert_eq!(decode_object_key("uploaded/a%2Bb.csv").unwrap(), "uploaded/a+b.csv");
        assert!(matches!(
            decode_object_key("uploaded/%FF.csv"),
            Err(TriggerError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_uploaded_objects_skips_foreign_prefixes() {
        let event = S3EventNotification::from_json(&event_body(&[
            ("catalog-imports", "uploaded/products.csv"),
            ("catalog-imports", "parsed/products.csv"),
        ]))
        .unwrap();

        let objects: Vec<StorageObjectRef> = event
            .uploaded_objects()
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            objects,
            vec![StorageObjectRef {
                bucket: "catalog-imports".to_string(),
                key: "uploaded/products.csv".to_string(),
            }]
        );
    }

    #[test]
    fn test_event_without_records() {
        let event = S3EventNotification::from_json("{}").unwrap();
        assert!(event.uploaded_objects().is_empty());
    }

    #[test]
    fn test_undecodable_key_does_not_hide_other_records() {
        let event = S3EventNotification::from_json(&event_body(&[
            ("catalog-imports", "uploaded/%FF.csv"),
            ("catalog-imports", "uploaded/a.csv"),
        ]))
        .unwrap();

        let objects = event.uploaded_objects();

        assert_eq!(objects.len(), 2);
        assert!(matches!(objects[0], Err(TriggerError::InvalidKey { .. })));
        assert_eq!(objects[1].as_ref().unwrap().key, "uploaded/a.csv");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invoke_ingests_and_acknowledges() {
        let h = harness();
        h.store.put(
            "catalog-imports",
            "uploaded/spring sale.csv",
            "id,title,price\np1,Widget,9.99\np2,Gadget,19.5\n",
        );
        let message = deliver(
            &h.events,
            event_body(&[("catalog-imports", "uploaded/spring+sale.csv")]),
        )
        .await;

        let reports = h.trigger.invoke(&message).await.unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].rows_sent, 2);
        assert_eq!(h.rows.sent_bodies().len(), 2);
        assert_eq!(h.events.in_flight_len(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_invocation_leaves_event_for_redelivery() {
        let h = harness();
        h.store
            .put("catalog-imports", "uploaded/a.csv", "id,title\np1,Widget\n");
        let message = deliver(
            &h.events,
            event_body(&[
                ("catalog-imports", "uploaded/a.csv"),
                ("catalog-imports", "uploaded/missing.csv"),
            ]),
        )
        .await;

        let result = h.trigger.invoke(&message).await;

        assert!(matches!(result, Err(TriggerError::Ingest(_))));
        assert_eq!(h.rows.sent_bodies().len(), 1);
        assert_eq!(h.events.in_flight_len(), 1);

        h.events.expire_visibility();
        assert_eq!(h.events.visible_len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_event_is_not_acknowledged() {
        let h = harness();
        let message = deliver(&h.events, "not json".to_string()).await;

        let result = h.trigger.invoke(&message).await;

        assert!(matches!(result, Err(TriggerError::InvalidEvent(_))));
        assert_eq!(h.events.in_flight_len(), 1);
    }

    #[tokio::test]
    async fn test_event_with_no_uploads_is_acknowledged() {
        let h = harness();
        let message = deliver(&h.events, r#"{"Records":[]}"#.to_string()).await;

        let reports = h.trigger.invoke(&message).await.unwrap();

        assert!(reports.is_empty());
        assert_eq!(h.events.in_flight_len(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_valid_objects_ingested_before_invalid_key_fails_event() {
        let h = harness();
        h.store
            .put("catalog-imports", "uploaded/a.csv", "id,title\np1,Widget\n");
        let message = deliver(
            &h.events,
            event_body(&[
                ("catalog-imports", "uploaded/%FF.csv"),
                ("catalog-imports", "uploaded/a.csv"),
            ]),
        )
        .await;

        let result = h.trigger.invoke(&message).await;

        assert!(matches!(result, Err(TriggerError::InvalidKey { .. })));
        assert_eq!(h.rows.sent_bodies().len(), 1);
        assert_eq!(h.events.in_flight_len(), 1);
    }

    /// Object store whose reads complete only once two reads wait together
    struct RendezvousStore {
        inner: MemoryObjectStore,
        barrier: Barrier,
    }

    #[async_trait]
    impl ObjectStore for RendezvousStore {
        async fn presign_put(
            &self,
            key: &str,
            content_type: &str,
            expires_in: Duration,
        ) -> Result<String, ObjectStoreError> {
            self.inner.presign_put(key, content_type, expires_in).await
        }

        async fn open_read(
            &self,
            bucket: &str,
            key: &str,
        ) -> Result<ObjectReader, ObjectStoreError> {
            self.barrier.wait().await;
            self.inner.open_read(bucket, key).await
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_poll_invokes_received_events_concurrently() {
        let store = Arc::new(RendezvousStore {
            inner: MemoryObjectStore::new(),
            barrier: Barrier::new(2),
        });
        store
            .inner
            .put("catalog-imports", "uploaded/a.csv", "id,title\np1,Widget\n");
        store
            .inner
            .put("catalog-imports", "uploaded/b.csv", "id,title\np2,Gadget\n");
        let rows = Arc::new(MemoryQueue::new());
        let events = Arc::new(MemoryQueue::new());
        let worker = Arc::new(IngestionWorker::new(
            store,
            rows.clone(),
            IngestConfig::default(),
        ));
        let trigger = StorageEventTrigger::new(events.clone(), worker, settings());

        events
            .send(event_body(&[("catalog-imports", "uploaded/a.csv")]))
            .await
            .unwrap();
        events
            .send(event_body(&[("catalog-imports", "uploaded/b.csv")]))
            .await
            .unwrap();

        // Sequential invocation would leave the first read stuck at the barrier.
        let summary = tokio::time::timeout(Duration::from_secs(10), trigger.poll_once())
            .await
            .expect("events were not invoked concurrently")
            .unwrap();

        assert_eq!(
            summary,
            PollSummary {
                processed: 2,
                failed: 0
            }
        );
        assert_eq!(rows.sent_bodies().len(), 2);
        assert_eq!(events.in_flight_len(), 0);
        assert_eq!(events.visible_len(), 0);
    }

    #[tokio::test]
    async fn test_poll_counts_failed_events() {
        let h = harness();
        h.events.send("not json".to_string()).await.unwrap();
        h.events.send(r#"{"Records":[]}"#.to_string()).await.unwrap();

        let summary = h.trigger.poll_once().await.unwrap();

        assert_eq!(
            summary,
            PollSummary {
                processed: 1,
                failed: 1
            }
        );
        assert_eq!(h.events.in_flight_len(), 1);
    }
}
