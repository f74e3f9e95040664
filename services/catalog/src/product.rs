//! Catalog item and stock rows derived from a queued row record.

use catalog_pipeline::RowRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use thiserror::Error;

/// A row record that cannot be turned into catalog rows
#[derive(Error, Debug, PartialEq)]
pub enum NormalizeError {
    #[error("Record is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Record field `{field}` is invalid: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
}

/// Row of `catalog_items`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub price: f64,
}

/// Row of `catalog_stock`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRecord {
    pub product_id: String,
    pub count: i32,
}

/// Catalog item joined with its stock count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CatalogProduct {
    pub id: String,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub count: i32,
}

impl CatalogItem {
    /// Build the item row. `description` defaults to an empty string.
    pub fn from_record(record: &RowRecord) -> Result<Self, NormalizeError> {
        let id = required_text(record, "id")?;
        if id.trim().is_empty() {
            return Err(NormalizeError::InvalidField {
                field: "id",
                message: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            id,
            title: required_text(record, "title")?,
            description: optional_text(record, "description")?.unwrap_or_default(),
            price: price(record)?,
        })
    }
}

impl StockRecord {
    /// Build the stock row for an item. `count` defaults to 0.
    pub fn from_record(item: &CatalogItem, record: &RowRecord) -> Result<Self, NormalizeError> {
        Ok(Self {
            product_id: item.id.clone(),
            count: stock_count(record)?,
        })
    }
}

impl CatalogProduct {
    pub fn new(item: CatalogItem, count: i32) -> Self {
        Self {
            id: item.id,
            title: item.title,
            description: item.description,
            price: item.price,
            count,
        }
    }
}

/// Normalize a decoded record into its item and stock rows
pub fn normalize(record: &RowRecord) -> Result<(CatalogItem, StockRecord), NormalizeError> {
    let item = CatalogItem::from_record(record)?;
    let stock = StockRecord::from_record(&item, record)?;
    Ok((item, stock))
}

fn text(field: &'static str, value: &Value) -> Result<String, NormalizeError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(NormalizeError::InvalidField {
            field,
            message: format!("expected text, got {other}"),
        }),
    }
}

fn required_text(record: &RowRecord, field: &'static str) -> Result<String, NormalizeError> {
    match record.get(field) {
        None | Some(Value::Null) => Err(NormalizeError::MissingField(field)),
        Some(value) => text(field, value),
    }
}

fn optional_text(record: &RowRecord, field: &'static str) -> Result<Option<String>, NormalizeError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => text(field, value).map(Some),
    }
}

fn price(record: &RowRecord) -> Result<f64, NormalizeError> {
    let invalid = |message: String| NormalizeError::InvalidField {
        field: "price",
        message,
    };

    let price = match record.get("price") {
        None | Some(Value::Null) => return Err(NormalizeError::MissingField("price")),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| invalid(format!("{n} is not representable")))?,
        Some(Value::String(s)) if s.trim().is_empty() => {
            return Err(NormalizeError::MissingField("price"))
        }
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| invalid(format!("{s:?}: {e}")))?,
        Some(other) => return Err(invalid(format!("expected a number, got {other}"))),
    };

    if !price.is_finite() || price < 0.0 {
        return Err(invalid(format!("{price} is not a non-negative amount")));
    }

    Ok(price)
}

fn stock_count(record: &RowRecord) -> Result<i32, NormalizeError> {
    let invalid = |message: String| NormalizeError::InvalidField {
        field: "count",
        message,
    };

    let count: u64 = match record.get("count") {
        None | Some(Value::Null) => 0,
        Some(Value::String(s)) if s.trim().is_empty() => 0,
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| invalid(format!("{s:?} is not a non-negative integer")))?,
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| invalid(format!("{n} is not a non-negative integer")))?,
        Some(other) => return Err(invalid(format!("expected an integer, got {other}"))),
    };

    i32::try_from(count).map_err(|_| invalid(format!("{count} is out of range")))
}
