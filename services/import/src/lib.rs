//! Catalog Import Service
//!
//! Front half of the catalog ingestion pipeline. Clients ask for a signed
//! upload URL, PUT a CSV file under `uploaded/` in the import bucket, and the
//! bucket's object-created notification drives the ingestion worker, which
//! streams the file and enqueues one catalog items message per row.
//!
//! ## Architecture
//!
//! ```text
//!  Client                    S3 Bucket                  SQS
//! ┌──────────────┐  PUT     ┌──────────────┐          ┌──────────────┐
//! │ GET /import  │─────────▶│ uploaded/    │          │ catalog      │
//! └──────────────┘          └──────────────┘          │ items queue  │
//!        ▲                         │                  └──────────────┘
//!        │ signedUrl               │ ObjectCreated           ▲
//! ┌──────────────┐          ┌──────────────┐                 │
//! │ Upload URL   │          │ Storage      │                 │
//! │ API          │          │ Event Trigger│                 │
//! └──────────────┘          └──────────────┘                 │
//!                                  │                         │
//!                                  ▼                         │
//!                           ┌──────────────┐   one message   │
//!                           │ CSV Ingestion│────per row──────┘
//!                           │ Worker       │
//!                           └──────────────┘
//! ```

pub mod config;
pub mod csv_ingest;
pub mod object_store;
pub mod storage_events;
pub mod upload_api;

pub use config::Config;
pub use csv_ingest::{IngestError, IngestionWorker, ObjectReport};
pub use object_store::{MemoryObjectStore, ObjectStore, ObjectStoreError, S3Gateway};
pub use storage_events::{
    decode_object_key, PollSummary, S3EventNotification, StorageEventTrigger, StorageObjectRef,
    TriggerError, TriggerSettings, UPLOAD_PREFIX,
};
pub use upload_api::{
    authorize_upload, create_router, AppState, UploadError, UPLOAD_CONTENT_TYPE,
    UPLOAD_URL_EXPIRY,
};
