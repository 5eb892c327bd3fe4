//! Document store collaborator
//!
//! The core reads and writes every record through [`DocumentStore`]: per-id
//! get/put/delete, a simple query, and an ascending cursor used by the
//! timeline aggregator. Documents are JSON objects keyed by `_id`.
//!
//! Implementations:
//! - [`InMemoryStore`] for development and tests
//! - [`crate::db::MongoStore`] for MongoDB

pub mod memory;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::types::{ChronasError, Result};

pub use memory::InMemoryStore;

/// Collection holding map markers
pub const MARKERS_COLLECTION: &str = "markers";
/// Collection holding metadata records, including `links` and derived aggregates
pub const METADATA_COLLECTION: &str = "metadata";
/// Collection holding one snapshot per year
pub const AREAS_COLLECTION: &str = "areas";
/// Collection holding revisions
pub const REVISIONS_COLLECTION: &str = "revisions";
/// Collection holding users and their reputation counters
pub const USERS_COLLECTION: &str = "users";

/// Lazy, single-use sequence of documents
pub type DocumentStream = BoxStream<'static, Result<Value>>;

/// Query understood by every store implementation
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Every document in the collection
    All,
    /// Documents whose `_id` is one of the given ids
    Ids(Vec<String>),
    /// Documents whose top-level `field` equals `value`
    FieldEq { field: String, value: Value },
}

impl Query {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Query::Ids(ids.into_iter().map(Into::into).collect())
    }

    pub fn field_eq(field: &str, value: impl Into<Value>) -> Self {
        Query::FieldEq {
            field: field.to_string(),
            value: value.into(),
        }
    }

    /// Evaluate the query against one document
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Query::All => true,
            Query::Ids(ids) => doc
                .get("_id")
                .and_then(Value::as_str)
                .map(|id| ids.iter().any(|wanted| wanted == id))
                .unwrap_or(false),
            Query::FieldEq { field, value } => doc.get(field) == Some(value),
        }
    }
}

/// Key-value document store with a streaming read primitive
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load one document by id
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Create or overwrite one document. The stored document carries `_id = id`.
    async fn put(&self, collection: &str, id: &str, body: Value) -> Result<()>;

    /// Delete one document, returning whether it existed
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    /// Find documents matching a query
    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Value>>;

    /// Open a fresh cursor over the collection, ascending by `field`.
    /// Each call returns an independent stream.
    async fn stream_ascending_by(&self, collection: &str, field: &str) -> Result<DocumentStream>;
}

/// Load a document or fail with `NotFound`
pub async fn require(store: &dyn DocumentStore, collection: &str, id: &str) -> Result<Value> {
    store
        .get(collection, id)
        .await?
        .ok_or_else(|| ChronasError::NotFound(format!("{}/{}", collection, id)))
}

/// Stamp `_id` onto a JSON object body
pub(crate) fn with_id(mut body: Value, id: &str) -> Result<Value> {
    match body.as_object_mut() {
        Some(map) => {
            map.insert("_id".to_string(), Value::String(id.to_string()));
            Ok(body)
        }
        None => Err(ChronasError::BadRequest(format!(
            "Document '{}' must be a JSON object",
            id
        ))),
    }
}
