//! Document store abstraction.
//!
//! Records are flat JSON objects addressed by `(collection, id)`. The DynamoDB
//! adapter lives in [`crate::dynamo`], the in-memory one in [`crate::memory`].

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

pub type Fields = serde_json::Map<String, serde_json::Value>;

pub const USERS: &str = "users";
pub const COMMUNITIES: &str = "communities";
pub const COUNTERS: &str = "counters";
pub const ACCOUNT_LINKS: &str = "account_links";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document store request failed: {0}")]
    Backend(String),
    #[error("malformed document {collection}/{id}: {reason}")]
    Malformed {
        collection: String,
        id: String,
        reason: String,
    },
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns `None` when the document does not exist.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, StoreError>;

    /// Creates or fully replaces the document.
    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError>;

    /// All documents of `collection` whose `field` equals `value`, with their ids.
    async fn query_equal(
        &self,
        collection: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<(String, Fields)>, StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Atomically adds `delta` to an integer field (missing counts as 0) and
    /// returns the new value. Creates the document if needed.
    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, StoreError>;
}

/// Serialize a record into store fields.
pub fn to_fields<T: Serialize>(collection: &str, id: &str, value: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::Malformed {
            collection: collection.to_string(),
            id: id.to_string(),
            reason: format!("expected an object, got {}", other),
        }),
        Err(e) => Err(StoreError::Malformed {
            collection: collection.to_string(),
            id: id.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Deserialize store fields into a record.
pub fn from_fields<T: DeserializeOwned>(
    collection: &str,
    id: &str,
    fields: Fields,
) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::Object(fields)).map_err(|e| StoreError::Malformed {
        collection: collection.to_string(),
        id: id.to_string(),
        reason: e.to_string(),
    })
}

/// Fetch and decode a typed record.
pub async fn get_record<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(collection, id).await? {
        Some(fields) => from_fields(collection, id, fields).map(Some),
        None => Ok(None),
    }
}

/// Encode and write a typed record.
pub async fn put_record<T: Serialize>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
    value: &T,
) -> Result<(), StoreError> {
    let fields = to_fields(collection, id, value)?;
    store.set(collection, id, fields).await
}
