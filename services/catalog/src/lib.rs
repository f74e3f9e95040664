//! Catalog Service
//!
//! Back half of the catalog ingestion pipeline. Drains the catalog items queue
//! in small batches, upserts each record into `catalog_items` and
//! `catalog_stock`, and announces every processed record on the notification
//! channel with the subject "New Product Created".
//!
//! ## Architecture
//!
//! ```text
//!  SQS                       PostgreSQL                Kafka
//! ┌──────────────┐          ┌──────────────┐          ┌──────────────┐
//! │ catalog      │          │ catalog_items│          │ products     │
//! │ items queue  │          │ catalog_stock│          │ created topic│
//! └──────────────┘          └──────────────┘          └──────────────┘
//!        │                         ▲                         ▲
//!        ▼                         │                         │
//! ┌──────────────┐          ┌──────────────┐                 │
//! │ Batch        │─────────▶│ Batch        │─────────────────┘
//! │ Trigger      │  batch   │ Consumer     │   notification
//! └──────────────┘          └──────────────┘
//! ```

pub mod batch_consumer;
pub mod catalog_store;
pub mod config;
pub mod product;

pub use batch_consumer::{BatchConsumer, BatchError, BatchTrigger};
pub use catalog_store::{CatalogStore, MemoryCatalogStore, PgCatalogStore, StoreError};
pub use config::Config;
pub use product::{normalize, CatalogItem, CatalogProduct, NormalizeError, StockRecord};
