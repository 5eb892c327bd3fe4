//! Per-resource apply strategies
//!
//! The ledger never touches documents directly: every create, remove and
//! body replay goes through the [`ResourceHandler`] for the revision's
//! resource. Markers and metadata diff over the whole document; snapshots
//! diff over their `provinces` map.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::revision::Resource;
use crate::codec::{apply_diff, strip_ids, DiffMap};
use crate::store::{require, DocumentStore, AREAS_COLLECTION};
use crate::types::{ChronasError, Result};

/// Tombstone stored in a slot whose content has been deleted
pub const TOMBSTONE: i64 = -1;

/// Apply strategy for one resource type
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn collection(&self) -> &'static str;

    /// The part of a stored document that revisions diff over
    fn current_body(&self, doc: &Value) -> DiffMap;

    /// Current value of one slot, or the tombstone if absent
    fn current_slot(&self, doc: &Value, slot: &str) -> Value;

    async fn create(&self, id: &str, body: &DiffMap) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<()>;

    /// Write every key of `body` onto the stored body
    async fn apply(&self, id: &str, body: &DiffMap) -> Result<()>;

    /// Write one slot
    async fn apply_slot(&self, id: &str, slot: &str, value: &Value) -> Result<()>;
}

impl Resource {
    /// Strategy for this resource backed by `store`
    pub fn handler(&self, store: Arc<dyn DocumentStore>) -> Box<dyn ResourceHandler> {
        match self {
            Resource::Markers | Resource::Metadata => Box::new(EntityHandler {
                collection: self.collection(),
                store,
            }),
            Resource::Areas => Box::new(SnapshotHandler { store }),
        }
    }
}

fn object_mut<'a>(doc: &'a mut Value, id: &str) -> Result<&'a mut Map<String, Value>> {
    doc.as_object_mut()
        .ok_or_else(|| ChronasError::Internal(format!("Stored document '{}' is not an object", id)))
}

/// Markers and metadata records: `{ _id, type, subtype, year?, coo?, data }`
pub struct EntityHandler {
    collection: &'static str,
    store: Arc<dyn DocumentStore>,
}

#[async_trait]
impl ResourceHandler for EntityHandler {
    fn collection(&self) -> &'static str {
        self.collection
    }

    fn current_body(&self, doc: &Value) -> DiffMap {
        let mut body = doc.as_object().cloned().unwrap_or_default();
        strip_ids(&mut body);
        body
    }

    fn current_slot(&self, doc: &Value, slot: &str) -> Value {
        doc.get("data")
            .and_then(|data| data.get(slot))
            .cloned()
            .unwrap_or_else(|| Value::from(TOMBSTONE))
    }

    async fn create(&self, id: &str, body: &DiffMap) -> Result<()> {
        let mut body = body.clone();
        strip_ids(&mut body);
        self.store.put(self.collection, id, Value::Object(body)).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        if !self.store.delete(self.collection, id).await? {
            warn!(collection = self.collection, id = id, "Remove target already absent");
        }
        Ok(())
    }

    async fn apply(&self, id: &str, body: &DiffMap) -> Result<()> {
        let mut doc = require(self.store.as_ref(), self.collection, id).await?;
        apply_diff(object_mut(&mut doc, id)?, body);
        self.store.put(self.collection, id, doc).await
    }

    async fn apply_slot(&self, id: &str, slot: &str, value: &Value) -> Result<()> {
        let mut doc = require(self.store.as_ref(), self.collection, id).await?;
        let fields = object_mut(&mut doc, id)?;
        let data = fields
            .entry("data")
            .or_insert_with(|| Value::Object(Map::new()));
        if !data.is_object() {
            *data = Value::Object(Map::new());
        }
        if let Some(slots) = data.as_object_mut() {
            slots.insert(slot.to_string(), value.clone());
        }
        debug!(collection = self.collection, id = id, slot = slot, "Slot written");
        self.store.put(self.collection, id, doc).await
    }
}

/// Yearly snapshots: `{ _id: "<year>", year, provinces }`
pub struct SnapshotHandler {
    store: Arc<dyn DocumentStore>,
}

impl SnapshotHandler {
    fn year_of(id: &str) -> Result<i64> {
        id.parse()
            .map_err(|_| ChronasError::BadRequest(format!("Snapshot id '{}' is not a year", id)))
    }

    fn provinces_mut<'a>(doc: &'a mut Value, id: &str) -> Result<&'a mut Map<String, Value>> {
        let fields = object_mut(doc, id)?;
        let provinces = fields
            .entry("provinces")
            .or_insert_with(|| Value::Object(Map::new()));
        if !provinces.is_object() {
            *provinces = Value::Object(Map::new());
        }
        provinces
            .as_object_mut()
            .ok_or_else(|| ChronasError::Internal(format!("Snapshot '{}' has no provinces", id)))
    }
}

#[async_trait]
impl ResourceHandler for SnapshotHandler {
    fn collection(&self) -> &'static str {
        AREAS_COLLECTION
    }

    fn current_body(&self, doc: &Value) -> DiffMap {
        doc.get("provinces")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    fn current_slot(&self, doc: &Value, slot: &str) -> Value {
        doc.get("provinces")
            .and_then(|p| p.get(slot))
            .cloned()
            .unwrap_or_else(|| Value::from(TOMBSTONE))
    }

    async fn create(&self, id: &str, body: &DiffMap) -> Result<()> {
        let doc = serde_json::json!({
            "year": Self::year_of(id)?,
            "provinces": Value::Object(body.clone()),
        });
        self.store.put(AREAS_COLLECTION, id, doc).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        if !self.store.delete(AREAS_COLLECTION, id).await? {
            warn!(year = id, "Snapshot already absent");
        }
        Ok(())
    }

    async fn apply(&self, id: &str, body: &DiffMap) -> Result<()> {
        let mut doc = require(self.store.as_ref(), AREAS_COLLECTION, id).await?;
        apply_diff(Self::provinces_mut(&mut doc, id)?, body);
        self.store.put(AREAS_COLLECTION, id, doc).await
    }

    async fn apply_slot(&self, id: &str, slot: &str, value: &Value) -> Result<()> {
        let mut doc = require(self.store.as_ref(), AREAS_COLLECTION, id).await?;
        Self::provinces_mut(&mut doc, id)?.insert(slot.to_string(), value.clone());
        self.store.put(AREAS_COLLECTION, id, doc).await
    }
}
