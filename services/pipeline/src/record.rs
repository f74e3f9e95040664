//! Row records: the unit of work flowing through the pipeline.
//!
//! A [`RowRecord`] is deliberately untyped. The ingestion side fills it with
//! trimmed strings straight from the CSV header and row; the consuming side
//! applies its own typed normalization right before writing. Column order is
//! preserved so that the JSON rendering of a record follows the source row.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while encoding or decoding a record body
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Failed to decode row record: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Failed to encode row record: {0}")]
    Encode(#[source] serde_json::Error),
}

/// One parsed data row as an ordered column-name → value mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowRecord(Map<String, Value>);

impl RowRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from string pairs, keeping their order
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut record = Self::new();
        for (key, value) in pairs {
            record.insert(key, value);
        }
        record
    }

    /// Insert a string column. A repeated column name overwrites the earlier
    /// value but keeps its position.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.insert(column.into(), Value::String(value.into()));
    }

    /// Raw JSON value of a column
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// Column value if it is a JSON string
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Column names in source order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Compact JSON used as the queue message body
    pub fn to_message_body(&self) -> Result<String, RecordError> {
        serde_json::to_string(&self.0).map_err(RecordError::Encode)
    }

    /// Decode a queue message body. Anything but a JSON object is rejected.
    pub fn from_message_body(body: &str) -> Result<Self, RecordError> {
        serde_json::from_str(body).map_err(RecordError::Decode)
    }

    /// Pretty-printed JSON (two-space indent), used as notification body
    pub fn to_pretty_json(&self) -> Result<String, RecordError> {
        serde_json::to_string_pretty(&self.0).map_err(RecordError::Encode)
    }
}

impl From<Map<String, Value>> for RowRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
