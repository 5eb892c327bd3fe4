//! In-memory document store
//!
//! Used in development mode and by the test suites. Streams are taken from a
//! point-in-time copy of the collection, so writes made while a stream is
//! being consumed are not observed by it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{with_id, DocumentStore, DocumentStream, Query};
use crate::types::Result;

type Collection = BTreeMap<String, Value>;

/// Simple in-memory document store
#[derive(Clone, Default)]
pub struct InMemoryStore {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

/// Order two documents by a field: numbers numerically, then strings,
/// documents missing the field last.
fn compare_by_field(a: &Value, b: &Value, field: &str) -> Ordering {
    match (a.get(field), b.get(field)) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn put(&self, collection: &str, id: &str, body: Value) -> Result<()> {
        let doc = with_id(body, id)?;
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        Ok(self
            .collections
            .write()
            .await
            .get_mut(collection)
            .map(|docs| docs.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Value>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.values().filter(|d| query.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn stream_ascending_by(&self, collection: &str, field: &str) -> Result<DocumentStream> {
        let mut docs: Vec<Value> = self
            .collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default();

        docs.sort_by(|a, b| compare_by_field(a, b, field));

        Ok(Box::pin(stream::iter(docs.into_iter().map(Ok))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryStore::new();

        store.put("markers", "m1", json!({ "name": "Stockholm" })).await.unwrap();
        let doc = store.get("markers", "m1").await.unwrap().expect("stored");
        assert_eq!(doc["_id"], "m1");
        assert_eq!(doc["name"], "Stockholm");

        assert!(store.delete("markers", "m1").await.unwrap());
        assert!(!store.delete("markers", "m1").await.unwrap());
        assert!(store.get("markers", "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_is_numerically_ascending() {
        let store = InMemoryStore::new();
        for year in [1900, 1850, 950, 1851] {
            store
                .put("areas", &year.to_string(), json!({ "year": year }))
                .await
                .unwrap();
        }

        let years: Vec<i64> = store
            .stream_ascending_by("areas", "year")
            .await
            .unwrap()
            .map(|doc| doc.unwrap()["year"].as_i64().unwrap())
            .collect()
            .await;

        assert_eq!(years, vec![950, 1850, 1851, 1900]);
    }

    #[tokio::test]
    async fn test_find_by_ids() {
        let store = InMemoryStore::new();
        store.put("metadata", "a", json!({})).await.unwrap();
        store.put("metadata", "b", json!({})).await.unwrap();
        store.put("metadata", "c", json!({})).await.unwrap();

        let found = store
            .find("metadata", &Query::ids(["a", "c", "missing"]))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(store.count("metadata").await, 3);
    }
}
