//! CSV ingestion worker.
//!
//! Streams an uploaded CSV object, parses it row by row and forwards every row
//! as one message on the catalog items queue. Parsing runs on a blocking
//! thread reading the object through a [`SyncIoBridge`]; rows cross a bounded
//! channel to the async side, which keeps up to `max_in_flight_sends` queue
//! sends running at once and waits for all of them before the object counts
//! as done.

use crate::config::IngestConfig;
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::storage_events::StorageObjectRef;
use catalog_pipeline::{MessageQueue, QueueError, RecordError, RowRecord};
use futures::StreamExt;
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, error, info, instrument};

/// Errors raised while ingesting uploaded objects
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),

    #[error("Failed to parse CSV object {key}: {source}")]
    Parse {
        key: String,
        #[source]
        source: csv::Error,
    },

    #[error("CSV parser for {key} stopped unexpectedly: {message}")]
    ParserTask { key: String, message: String },

    #[error("{failed} of {attempted} row messages from {key} were not sent: {first}")]
    Send {
        key: String,
        failed: usize,
        attempted: usize,
        #[source]
        first: RowSendError,
    },

    #[error("{failed} of {total} uploaded objects failed to ingest: {first}")]
    Objects {
        failed: usize,
        total: usize,
        #[source]
        first: Box<IngestError>,
    },
}

/// Failure of a single row's queue send
#[derive(Error, Debug)]
pub enum RowSendError {
    #[error(transparent)]
    Encode(#[from] RecordError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Result of ingesting one object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectReport {
    pub bucket: String,
    pub key: String,
    pub rows_sent: usize,
}

/// Worker that fans uploaded CSV rows out onto the catalog items queue
pub struct IngestionWorker {
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn MessageQueue>,
    config: IngestConfig,
}

impl IngestionWorker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn MessageQueue>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Ingest every object of one trigger invocation.
    ///
    /// Objects are independent: a failing object does not stop the others
    /// and never takes back rows another object already sent. The invocation
    /// fails if any object failed.
    #[instrument(skip(self, objects), fields(objects = objects.len()))]
    pub async fn process_objects(
        &self,
        objects: &[StorageObjectRef],
    ) -> Result<Vec<ObjectReport>, IngestError> {
        let mut reports = Vec::with_capacity(objects.len());
        let mut failures = Vec::new();

        for object in objects {
            match self.process_object(object).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(
                        bucket = %object.bucket,
                        key = %object.key,
                        error = %e,
                        "Failed to ingest uploaded object"
                    );
                    metrics::counter!("import.objects.failed").increment(1);
                    failures.push(e);
                }
            }
        }

        if failures.is_empty() {
            return Ok(reports);
        }

        let failed = failures.len();
        let first = failures.swap_remove(0);
        Err(IngestError::Objects {
            failed,
            total: objects.len(),
            first: Box::new(first),
        })
    }

    /// Stream one object and send one queue message per data row
    #[instrument(skip(self), fields(bucket = %object.bucket, key = %object.key))]
    pub async fn process_object(&self, object: &StorageObjectRef) -> Result<ObjectReport, IngestError> {
        let started = Instant::now();
        info!("Processing uploaded object");

        let reader = self.store.open_read(&object.bucket, &object.key).await?;
        let bridge = SyncIoBridge::new(reader);

        let (row_tx, row_rx) = mpsc::channel(self.config.row_buffer);
        let parser = tokio::task::spawn_blocking(move || parse_rows(bridge, &row_tx));

        let queue = self.queue.clone();
        let results: Vec<Result<(), RowSendError>> = ReceiverStream::new(row_rx)
            .map(|row| {
                let queue = queue.clone();
                async move {
                    let body = row.to_message_body()?;
                    queue.send(body).await?;
                    Ok::<(), RowSendError>(())
                }
            })
            .buffer_unordered(self.config.max_in_flight_sends)
            .collect()
            .await;

        // Every send has settled by now, whatever the parser reports.
        let attempted = results.len();
        let mut send_errors = results.into_iter().filter_map(Result::err);
        let first_send_error = send_errors.next();
        let failed_sends = first_send_error.as_ref().map_or(0, |_| 1 + send_errors.count());
        let rows_sent = attempted - failed_sends;

        metrics::counter!("import.rows.sent").increment(rows_sent as u64);

        let parsed = parser
            .await
            .map_err(|e| IngestError::ParserTask {
                key: object.key.clone(),
                message: e.to_string(),
            })?
            .map_err(|source| IngestError::Parse {
                key: object.key.clone(),
                source,
            })?;

        if let Some(first) = first_send_error {
            return Err(IngestError::Send {
                key: object.key.clone(),
                failed: failed_sends,
                attempted,
                first,
            });
        }

        metrics::counter!("import.objects.processed").increment(1);
        metrics::histogram!("import.object.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        info!(
            rows_parsed = parsed,
            rows_sent,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Finished processing uploaded object"
        );

        Ok(ObjectReport {
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            rows_sent,
        })
    }
}

/// Parse CSV rows from a blocking reader and hand each one to the sender.
///
/// Returns the number of rows parsed. Stops early, without error, if the
/// receiving side went away.
fn parse_rows<R: Read>(input: R, rows: &mpsc::Sender<RowRecord>) -> Result<usize, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b',')
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader.byte_headers()?.clone();
    let mut record = csv::ByteRecord::new();
    let mut parsed = 0;

    while reader.read_byte_record(&mut record)? {
        let row = row_record(&headers, &record);
        debug!(columns = row.len(), "Parsed row");

        if rows.blocking_send(row).is_err() {
            break;
        }
        parsed += 1;
    }

    metrics::counter!("import.rows.parsed").increment(parsed as u64);

    Ok(parsed)
}

/// Map a CSV row onto the header columns.
///
/// Short rows simply lack the trailing columns. Cells past the last header
/// are kept under `_<index>`. Invalid UTF-8 is replaced, not rejected.
fn row_record(headers: &csv::ByteRecord, record: &csv::ByteRecord) -> RowRecord {
    let mut row = RowRecord::new();

    for (index, value) in record.iter().enumerate() {
        let value = String::from_utf8_lossy(value);
        match headers.get(index) {
            Some(column) => row.insert(String::from_utf8_lossy(column).trim(), value.trim()),
            None => row.insert(format!("_{index}"), value.trim()),
        }
    }

    row
}
