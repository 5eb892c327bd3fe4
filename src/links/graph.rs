//! Link graph manager
//!
//! Each side of an edge is written through the ledger as its own
//! single-slot update of the `links` record, one after the other. The two
//! writes are not transactional: if the second fails, the first stays and
//! the caller receives `AsymmetricLinkWrite`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::{AdjacencyPair, EdgeKey, EntityKind, Endpoint, Feature, LinkedItems, LINKS_ID};
use crate::ledger::{Resource, RevisionLedger};
use crate::store::{DocumentStore, Query, METADATA_COLLECTION};
use crate::types::{ChronasError, Result};

/// Outcome of an edge edit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkChange {
    /// Revision ids written, in write order
    pub revisions: Vec<String>,
}

impl LinkChange {
    pub fn is_noop(&self) -> bool {
        self.revisions.is_empty()
    }
}

/// Maintains symmetric typed adjacency inside the `links` record
pub struct LinkGraph {
    ledger: Arc<RevisionLedger>,
    store: Arc<dyn DocumentStore>,
    /// Serialises read-modify-write cycles of the shared links record
    edit_lock: Mutex<()>,
}

impl LinkGraph {
    pub fn new(ledger: Arc<RevisionLedger>) -> Self {
        let store = ledger.store();
        Self {
            ledger,
            store,
            edit_lock: Mutex::new(()),
        }
    }

    /// The links record as stored, if it exists yet
    pub(crate) async fn read_links(&self) -> Result<Option<Value>> {
        self.store.get(METADATA_COLLECTION, LINKS_ID).await
    }

    /// Load the links record, creating an empty one on first use
    pub(crate) async fn load_links(&self) -> Result<Value> {
        if let Some(doc) = self.read_links().await? {
            return Ok(doc);
        }

        info!("Initialising empty links record");
        let doc = json!({ "type": "g", "subtype": "links", "data": {} });
        self.store.put(METADATA_COLLECTION, LINKS_ID, doc).await?;
        self.store
            .get(METADATA_COLLECTION, LINKS_ID)
            .await?
            .ok_or_else(|| ChronasError::Internal("links record vanished after creation".into()))
    }

    pub(crate) fn pair_of(doc: &Value, key: &EdgeKey) -> Result<AdjacencyPair> {
        let slot = doc.get("data").and_then(|data| data.get(key.to_string()));
        AdjacencyPair::from_slot_value(slot)
    }

    /// Connect `a` and `b`. `b` is stored in `a`'s pair with `b.tag`, and
    /// `a` in `b`'s pair with `a.tag`.
    pub async fn add_edge(&self, user: &str, a: &Endpoint, b: &Endpoint) -> Result<LinkChange> {
        if a.key == b.key {
            return Err(ChronasError::BadRequest(format!(
                "Cannot link '{}' to itself",
                a.key
            )));
        }

        let _guard = self.edit_lock.lock().await;
        let doc = self.load_links().await?;

        let mut pair_a = Self::pair_of(&doc, &a.key)?;
        let mut pair_b = Self::pair_of(&doc, &b.key)?;
        let changed_a = pair_a.upsert(&b.key, b.tag);
        let changed_b = pair_b.upsert(&a.key, a.tag);

        debug!(a = %a.key, b = %b.key, changed_a, changed_b, "Adding edge");
        self.write_sides(user, [(&a.key, &pair_a, changed_a), (&b.key, &pair_b, changed_b)])
            .await
    }

    /// Disconnect `a` and `b` on both sides
    pub async fn remove_edge(&self, user: &str, a: &EdgeKey, b: &EdgeKey) -> Result<LinkChange> {
        let _guard = self.edit_lock.lock().await;
        let doc = self.load_links().await?;

        let mut pair_a = Self::pair_of(&doc, a)?;
        let mut pair_b = Self::pair_of(&doc, b)?;
        let changed_a = pair_a.remove(b);
        let changed_b = pair_b.remove(a);

        debug!(a = %a, b = %b, changed_a, changed_b, "Removing edge");
        self.write_sides(user, [(a, &pair_a, changed_a), (b, &pair_b, changed_b)])
            .await
    }

    async fn write_sides(
        &self,
        user: &str,
        sides: [(&EdgeKey, &AdjacencyPair, bool); 2],
    ) -> Result<LinkChange> {
        let mut change = LinkChange::default();
        let mut written: Option<&EdgeKey> = None;

        for (key, pair, changed) in sides {
            if !changed {
                continue;
            }
            let slot = key.to_string();
            let result = self
                .ledger
                .record_update_single(
                    user,
                    Resource::Metadata,
                    LINKS_ID,
                    &slot,
                    pair.to_slot_value()?,
                )
                .await;

            match (result, written) {
                (Ok(revision), _) => {
                    change.revisions.push(revision.id);
                    written = Some(key);
                }
                (Err(e), Some(first)) => {
                    error!(
                        written = %first,
                        failed = %key,
                        kind = e.kind(),
                        error = %e,
                        "Link write left the graph asymmetric"
                    );
                    return Err(ChronasError::AsymmetricLinkWrite {
                        written: first.to_string(),
                        failed: slot,
                        reason: e.to_string(),
                    });
                }
                (Err(e), None) => return Err(e),
            }
        }

        Ok(change)
    }

    /// Linked markers and metadata of `source`, split into map and media items.
    /// Ids that no longer exist in the store are skipped.
    pub async fn get_linked(&self, source: &EdgeKey) -> Result<LinkedItems> {
        let Some(doc) = self.store.get(METADATA_COLLECTION, LINKS_ID).await? else {
            return Ok(LinkedItems::default());
        };
        let pair = Self::pair_of(&doc, source)?;
        if pair.is_empty() {
            return Ok(LinkedItems::default());
        }

        let markers = self.fetch(EntityKind::Marker, &pair).await?;
        let metadata = self.fetch(EntityKind::Metadata, &pair).await?;

        let mut items = LinkedItems::default();
        for (key, tag) in pair.entries() {
            let found = match key.kind {
                EntityKind::Marker => markers.get(&key.id),
                EntityKind::Metadata => metadata.get(&key.id),
            };
            let Some(feature) = found else {
                debug!(source = %source, missing = %key, "Linked entity not found");
                continue;
            };
            if tag.on_map() {
                items.map_items.push(feature.clone());
            }
            if tag.on_media() {
                items.media_items.push(feature.clone());
            }
        }

        Ok(items)
    }

    async fn fetch(&self, kind: EntityKind, pair: &AdjacencyPair) -> Result<HashMap<String, Feature>> {
        let ids: Vec<String> = pair.list(kind).iter().map(|e| e.0.clone()).collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let docs = self.store.find(kind.collection(), &Query::Ids(ids)).await?;
        Ok(docs
            .iter()
            .filter_map(|doc| {
                let id = doc.get("_id")?.as_str()?.to_string();
                Feature::from_document(kind, doc).map(|feature| (id, feature))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::{LinkEntry, LinkTag};
    use crate::reputation::RecordingReputation;
    use crate::store::testing::FlakyStore;
    use crate::store::{InMemoryStore, MARKERS_COLLECTION};

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .put(MARKERS_COLLECTION, "stockholm", json!({ "name": "Stockholm", "coo": [18.06, 59.33] }))
            .await
            .unwrap();
        store
            .put(MARKERS_COLLECTION, "uppsala", json!({ "name": "Uppsala", "coo": [17.64, 59.86] }))
            .await
            .unwrap();
        store
            .put(METADATA_COLLECTION, "e_sweden", json!({ "type": "e", "subtype": "ps", "data": { "title": "Sweden" } }))
            .await
            .unwrap();
        store
    }

    fn graph_over(store: Arc<dyn DocumentStore>) -> LinkGraph {
        let ledger = RevisionLedger::new(store, Arc::new(RecordingReputation::new()));
        LinkGraph::new(Arc::new(ledger))
    }

    fn marker(id: &str, tag: LinkTag) -> Endpoint {
        Endpoint::new(EdgeKey::marker(id), tag)
    }

    fn metadata(id: &str, tag: LinkTag) -> Endpoint {
        Endpoint::new(EdgeKey::metadata(id), tag)
    }

    async fn slot(store: &dyn DocumentStore, key: &str) -> Value {
        store.get(METADATA_COLLECTION, LINKS_ID).await.unwrap().unwrap()["data"][key].clone()
    }

    #[tokio::test]
    async fn test_add_edge_is_symmetric() {
        let store = Arc::new(seeded_store().await);
        let graph = graph_over(store.clone());

        let change = graph
            .add_edge("ada", &marker("stockholm", LinkTag::Map), &metadata("e_sweden", LinkTag::Media))
            .await
            .unwrap();
        assert_eq!(change.revisions.len(), 2);

        assert_eq!(slot(store.as_ref(), "0:stockholm").await, json!([[], [["e_sweden", "e"]]]));
        assert_eq!(slot(store.as_ref(), "1:e_sweden").await, json!([[["stockholm", "a"]], []]));

        let from_marker = graph.get_linked(&EdgeKey::marker("stockholm")).await.unwrap();
        assert!(from_marker.map_items.is_empty());
        assert_eq!(from_marker.media_items.len(), 1);
        assert_eq!(from_marker.media_items[0].properties["id"], "e_sweden");

        let from_meta = graph.get_linked(&EdgeKey::metadata("e_sweden")).await.unwrap();
        assert_eq!(from_meta.map_items.len(), 1);
        assert_eq!(from_meta.map_items[0].properties["id"], "stockholm");
        assert!(from_meta.map_items[0].geometry.is_some());
    }

    #[tokio::test]
    async fn test_readding_widens_but_never_narrows() {
        let store = Arc::new(seeded_store().await);
        let graph = graph_over(store.clone());
        let a = marker("stockholm", LinkTag::Map);

        graph.add_edge("ada", &a, &marker("uppsala", LinkTag::Map)).await.unwrap();
        graph.add_edge("ada", &a, &marker("uppsala", LinkTag::Both)).await.unwrap();
        let change = graph
            .add_edge("ada", &a, &marker("uppsala", LinkTag::Media))
            .await
            .unwrap();
        assert!(change.is_noop());

        let pair = LinkGraph::pair_of(&graph.load_links().await.unwrap(), &EdgeKey::marker("stockholm")).unwrap();
        assert_eq!(pair.0, vec![LinkEntry("uppsala".into(), LinkTag::Both)]);

        let linked = graph.get_linked(&EdgeKey::marker("stockholm")).await.unwrap();
        assert_eq!(linked.map_items.len(), 1);
        assert_eq!(linked.media_items.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_edge_tombstones_empty_pairs() {
        let store = Arc::new(seeded_store().await);
        let graph = graph_over(store.clone());

        graph
            .add_edge("ada", &marker("stockholm", LinkTag::Both), &metadata("e_sweden", LinkTag::Both))
            .await
            .unwrap();
        graph
            .add_edge("ada", &marker("uppsala", LinkTag::Map), &metadata("e_sweden", LinkTag::Map))
            .await
            .unwrap();

        graph
            .remove_edge("ada", &EdgeKey::marker("stockholm"), &EdgeKey::metadata("e_sweden"))
            .await
            .unwrap();

        assert_eq!(slot(store.as_ref(), "0:stockholm").await, json!(-1));
        assert_eq!(slot(store.as_ref(), "1:e_sweden").await, json!([[["uppsala", "a"]], []]));

        let linked = graph.get_linked(&EdgeKey::marker("stockholm")).await.unwrap();
        assert_eq!(linked, LinkedItems::default());
        let linked = graph.get_linked(&EdgeKey::metadata("e_sweden")).await.unwrap();
        assert_eq!(linked.map_items.len(), 1);
        assert_eq!(linked.map_items[0].properties["id"], "uppsala");
    }

    #[tokio::test]
    async fn test_missing_entities_are_skipped() {
        let store = Arc::new(seeded_store().await);
        let graph = graph_over(store.clone());

        graph
            .add_edge("ada", &marker("stockholm", LinkTag::Both), &marker("ghost", LinkTag::Both))
            .await
            .unwrap();
        store.delete(MARKERS_COLLECTION, "ghost").await.unwrap();

        let linked = graph.get_linked(&EdgeKey::marker("stockholm")).await.unwrap();
        assert!(linked.map_items.is_empty());
        assert!(linked.media_items.is_empty());
    }

    #[tokio::test]
    async fn test_self_link_rejected() {
        let graph = graph_over(Arc::new(seeded_store().await));
        let a = marker("stockholm", LinkTag::Map);
        assert!(matches!(
            graph.add_edge("ada", &a, &a).await,
            Err(ChronasError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_second_side_failure_is_reported_as_asymmetric() {
        let store = Arc::new(FlakyStore::new(seeded_store().await));
        let graph = graph_over(store.clone());
        graph.load_links().await.unwrap();

        // side A is put #1 to the links record, side B is put #2
        store.fail_nth_put(METADATA_COLLECTION, LINKS_ID, 2);

        let err = graph
            .add_edge("ada", &marker("stockholm", LinkTag::Map), &marker("uppsala", LinkTag::Map))
            .await
            .unwrap_err();

        match err {
            ChronasError::AsymmetricLinkWrite { written, failed, .. } => {
                assert_eq!(written, "0:stockholm");
                assert_eq!(failed, "0:uppsala");
            }
            other => panic!("expected AsymmetricLinkWrite, got {:?}", other),
        }

        // left asymmetric, not silently repaired
        assert_eq!(slot(store.as_ref(), "0:stockholm").await, json!([[["uppsala", "a"]], []]));
        assert_eq!(slot(store.as_ref(), "0:uppsala").await, Value::Null);
    }
}
