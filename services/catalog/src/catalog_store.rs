use crate::config::DatabaseConfig;
use crate::product::{CatalogItem, CatalogProduct, StockRecord};
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Table store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Table store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed upserts into `catalog_items` and `catalog_stock`.
///
/// The two tables are written independently; there is no transaction spanning
/// an item and its stock row.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert or fully replace the item with the same id
    async fn upsert_item(&self, item: &CatalogItem) -> Result<(), StoreError>;

    /// Insert or replace the stock row with the same product id
    async fn upsert_stock(&self, stock: &StockRecord) -> Result<(), StoreError>;

    /// Read an item with its stock count; a missing stock row reads as 0
    async fn get_product(&self, id: &str) -> Result<Option<CatalogProduct>, StoreError>;
}

/// PostgreSQL-backed table store
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    /// Create a new store with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    #[instrument(skip(self, item), fields(id = %item.id))]
    async fn upsert_item(&self, item: &CatalogItem) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO catalog_items (id, title, description, price)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET title = EXCLUDED.title,
                description = EXCLUDED.description,
                price = EXCLUDED.price
            "#,
        )
        .bind(&item.id)
        .bind(&item.title)
        .bind(&item.description)
        .bind(item.price)
        .execute(&self.pool)
        .await?;

        debug!("Upserted catalog item");
        Ok(())
    }

    #[instrument(skip(self, stock), fields(product_id = %stock.product_id))]
    async fn upsert_stock(&self, stock: &StockRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO catalog_stock (product_id, count)
            VALUES ($1, $2)
            ON CONFLICT (product_id) DO UPDATE
            SET count = EXCLUDED.count
            "#,
        )
        .bind(&stock.product_id)
        .bind(stock.count)
        .execute(&self.pool)
        .await?;

        debug!(count = stock.count, "Upserted stock record");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_product(&self, id: &str) -> Result<Option<CatalogProduct>, StoreError> {
        let product = sqlx::query_as::<_, CatalogProduct>(
            r#"
            SELECT i.id, i.title, i.description, i.price, COALESCE(s.count, 0) AS count
            FROM catalog_items i
            LEFT JOIN catalog_stock s ON s.product_id = i.id
            WHERE i.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }
}

/// In-memory table store for tests and local runs
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    items: RwLock<HashMap<String, CatalogItem>>,
    stock: RwLock<HashMap<String, i32>>,
    writes: AtomicUsize,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of upserts applied to either table
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn item_count(&self) -> usize {
        self.items.read().len()
    }

    /// Raw stock row, `None` when no row was written
    pub fn stock_row(&self, product_id: &str) -> Option<i32> {
        self.stock.read().get(product_id).copied()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn upsert_item(&self, item: &CatalogItem) -> Result<(), StoreError> {
        self.items.write().insert(item.id.clone(), item.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_stock(&self, stock: &StockRecord) -> Result<(), StoreError> {
        self.stock
            .write()
            .insert(stock.product_id.clone(), stock.count);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_product(&self, id: &str) -> Result<Option<CatalogProduct>, StoreError> {
        let Some(item) = self.items.read().get(id).cloned() else {
            return Ok(None);
        };
        let count = self.stock_row(id).unwrap_or(0);
        Ok(Some(CatalogProduct::new(item, count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, title: &str, price: f64) -> CatalogItem {
        CatalogItem {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            price,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_rows() {
        let store = MemoryCatalogStore::new();

        store.upsert_item(&item("p1", "Widget", 9.99)).await.unwrap();
        store.upsert_item(&item("p1", "Widget v2", 12.5)).await.unwrap();
        store
            .upsert_stock(&StockRecord {
                product_id: "p1".to_string(),
                count: 5,
            })
            .await
            .unwrap();

        let product = store.get_product("p1").await.unwrap().unwrap();
        assert_eq!(product.title, "Widget v2");
        assert_eq!(product.price, 12.5);
        assert_eq!(product.count, 5);
        assert_eq!(store.item_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_stock_reads_as_zero() {
        let store = MemoryCatalogStore::new();
        store.upsert_item(&item("p1", "Widget", 9.99)).await.unwrap();

        let product = store.get_product("p1").await.unwrap().unwrap();

        assert_eq!(product.count, 0);
        assert_eq!(store.stock_row("p1"), None);
    }

    #[tokio::test]
    async fn test_unknown_product() {
        let store = MemoryCatalogStore::new();
        assert_eq!(store.get_product("nope").await.unwrap(), None);
    }
}
