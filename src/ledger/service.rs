//! Revision ledger
//!
//! Every mutation is recorded as a revision before it is applied, and every
//! revision can be toggled back and forth with [`RevisionLedger::revert`].
//!
//! ## Reputation
//!
//! Each ledger operation adjusts the acting user's counter exactly once:
//! `created`, `updated` or `deleted` for recordings (one adjustment for a
//! whole MANY batch), `reverted` for reverts. A revert also moves the
//! original author's `mistakes` counter: +1 when the revision becomes
//! reverted, -1 when it is re-applied.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::resource::ResourceHandler;
use super::revision::{Resource, Revision, RevisionType, MANY_ENTITY_ID};
use crate::cache::InitCache;
use crate::codec::{pack_ranges, shallow_diff, strip_ids, unpack_ranges, DiffMap, PackedRanges, YearDiffs};
use crate::reputation::{Counter, ReputationSink};
use crate::store::{require, DocumentStore, Query, REVISIONS_COLLECTION};
use crate::types::{ChronasError, Result};

/// Appends revisions and applies or reverts them through the store
pub struct RevisionLedger {
    store: Arc<dyn DocumentStore>,
    reputation: Arc<dyn ReputationSink>,
    cache: Option<Arc<InitCache>>,
}

impl RevisionLedger {
    pub fn new(store: Arc<dyn DocumentStore>, reputation: Arc<dyn ReputationSink>) -> Self {
        Self {
            store,
            reputation,
            cache: None,
        }
    }

    /// Attach the init cache whose invalidation hook runs after commits
    pub fn with_cache(mut self, cache: Arc<InitCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    fn handler(&self, resource: Resource) -> Box<dyn ResourceHandler> {
        resource.handler(self.store.clone())
    }

    async fn persist(&self, revision: &Revision) -> Result<()> {
        self.store
            .put(REVISIONS_COLLECTION, &revision.id, serde_json::to_value(revision)?)
            .await
    }

    fn committed(&self, resource: Resource, entity_id: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate_on_write(resource.collection(), entity_id);
        }
    }

    /// Record and apply the creation of `entity_id` with `body`
    pub async fn record_create(
        &self,
        user: &str,
        resource: Resource,
        entity_id: &str,
        body: DiffMap,
    ) -> Result<Revision> {
        let mut body = body;
        strip_ids(&mut body);

        let revision = Revision::new(RevisionType::Create, resource, entity_id, user)
            .with_bodies(None, Some(body));
        self.persist(&revision).await?;

        if let Some(next) = &revision.next_body {
            self.handler(resource).create(entity_id, next).await?;
        }
        self.committed(resource, entity_id);
        self.reputation.adjust(user, Counter::Created, 1).await;

        info!(revision_id = %revision.id, resource = %resource, entity_id, "Create recorded");
        Ok(revision)
    }

    /// Record and apply a whole-document update.
    ///
    /// `nextBody` holds the requested keys that differ from the stored body,
    /// `prevBody` the stored keys that differ from the request.
    pub async fn record_update(
        &self,
        user: &str,
        resource: Resource,
        entity_id: &str,
        requested: DiffMap,
    ) -> Result<Revision> {
        let handler = self.handler(resource);
        let doc = require(self.store.as_ref(), resource.collection(), entity_id).await?;
        let current = handler.current_body(&doc);

        let next = shallow_diff(&requested, &current);
        if next.is_empty() {
            return Err(ChronasError::BadRequest(format!(
                "Update of {}/{} changes nothing",
                resource, entity_id
            )));
        }
        let prev = shallow_diff(&current, &requested);

        let revision = Revision::new(RevisionType::Update, resource, entity_id, user)
            .with_bodies(Some(prev), Some(next));
        self.persist(&revision).await?;

        if let Some(next) = &revision.next_body {
            handler.apply(entity_id, next).await?;
        }
        self.committed(resource, entity_id);
        self.reputation.adjust(user, Counter::Updated, 1).await;

        info!(revision_id = %revision.id, resource = %resource, entity_id, "Update recorded");
        Ok(revision)
    }

    /// Record and apply an update of one slot of the entity's `data` map
    /// (or one province of a snapshot). A value of `-1` tombstones the slot.
    pub async fn record_update_single(
        &self,
        user: &str,
        resource: Resource,
        entity_id: &str,
        sub_entity_id: &str,
        value: Value,
    ) -> Result<Revision> {
        let handler = self.handler(resource);
        let doc = require(self.store.as_ref(), resource.collection(), entity_id).await?;
        let current = handler.current_slot(&doc, sub_entity_id);

        if current == value {
            return Err(ChronasError::BadRequest(format!(
                "Update of {}/{}[{}] changes nothing",
                resource, entity_id, sub_entity_id
            )));
        }

        let mut prev = Map::new();
        prev.insert(sub_entity_id.to_string(), current);
        let mut next = Map::new();
        next.insert(sub_entity_id.to_string(), value.clone());

        let revision = Revision::new(RevisionType::Update, resource, entity_id, user)
            .with_sub_entity(sub_entity_id)
            .with_bodies(Some(prev), Some(next));
        self.persist(&revision).await?;

        handler.apply_slot(entity_id, sub_entity_id, &value).await?;
        self.committed(resource, entity_id);
        self.reputation.adjust(user, Counter::Updated, 1).await;

        debug!(revision_id = %revision.id, entity_id, sub_entity_id, "Slot update recorded");
        Ok(revision)
    }

    /// Record a batched multi-year edit that the caller has already applied.
    ///
    /// Both sides are range-packed before they are stored.
    pub async fn record_update_many(
        &self,
        user: &str,
        resource: Resource,
        prev_by_year: YearDiffs,
        next_by_year: YearDiffs,
    ) -> Result<Revision> {
        let years = next_by_year.len();
        let prev = packed_to_body(pack_ranges(prev_by_year)?)?;
        let next = packed_to_body(pack_ranges(next_by_year)?)?;

        let revision = Revision::new(RevisionType::Update, resource, MANY_ENTITY_ID, user)
            .with_bodies(Some(prev), Some(next));
        self.persist(&revision).await?;
        self.reputation.adjust(user, Counter::Updated, 1).await;

        info!(revision_id = %revision.id, resource = %resource, years, "Batch update recorded");
        Ok(revision)
    }

    /// Record and apply the deletion of an entity
    pub async fn record_delete(
        &self,
        user: &str,
        resource: Resource,
        entity_id: &str,
    ) -> Result<Revision> {
        let handler = self.handler(resource);
        let doc = require(self.store.as_ref(), resource.collection(), entity_id).await?;

        let revision = Revision::new(RevisionType::Delete, resource, entity_id, user)
            .with_bodies(Some(handler.current_body(&doc)), None);
        self.persist(&revision).await?;

        handler.remove(entity_id).await?;
        self.committed(resource, entity_id);
        self.reputation.adjust(user, Counter::Deleted, 1).await;

        info!(revision_id = %revision.id, resource = %resource, entity_id, "Delete recorded");
        Ok(revision)
    }

    /// Toggle a revision: undo it if applied, re-apply it if reverted
    pub async fn revert(&self, user: &str, revision_id: &str) -> Result<Revision> {
        let mut revision = self.get_revision(revision_id).await?;
        let handler = self.handler(revision.resource);
        let entity_id = revision.entity_id.clone();

        match (revision.revision_type, revision.reverted) {
            (RevisionType::Create, false) | (RevisionType::Delete, true) => {
                handler.remove(&entity_id).await?;
            }
            (RevisionType::Create, true) => {
                handler.create(&entity_id, body_of(&revision, revision.next_body.as_ref())?).await?;
            }
            (RevisionType::Delete, false) => {
                handler.create(&entity_id, body_of(&revision, revision.prev_body.as_ref())?).await?;
            }
            (RevisionType::Update, _) if revision.is_batch() => {
                let body = body_of(&revision, revision.replay_body())?;
                let years = unpack_ranges(&body_to_packed(body)?)?;
                // One snapshot is saved before the next is loaded.
                for (year, year_body) in &years {
                    handler.apply(&year.to_string(), year_body).await?;
                }
                debug!(revision_id, years = years.len(), "Batch replayed");
            }
            (RevisionType::Update, _) => {
                let body = body_of(&revision, revision.replay_body())?;
                match &revision.sub_entity_id {
                    Some(slot) => {
                        let value = body.get(slot).cloned().ok_or_else(|| {
                            ChronasError::Internal(format!(
                                "Revision {} has no value for slot '{}'",
                                revision.id, slot
                            ))
                        })?;
                        handler.apply_slot(&entity_id, slot, &value).await?;
                    }
                    None => handler.apply(&entity_id, body).await?,
                }
            }
        }

        revision.reverted = !revision.reverted;
        self.persist(&revision).await?;
        if !revision.is_batch() {
            self.committed(revision.resource, &entity_id);
        }

        self.reputation.adjust(user, Counter::Reverted, 1).await;
        let mistake_delta = if revision.reverted { 1 } else { -1 };
        self.reputation
            .adjust(&revision.user, Counter::Mistakes, mistake_delta)
            .await;

        info!(
            revision_id,
            reverted = revision.reverted,
            by = user,
            "Revision toggled"
        );
        Ok(revision)
    }

    pub async fn get_revision(&self, revision_id: &str) -> Result<Revision> {
        let value = require(self.store.as_ref(), REVISIONS_COLLECTION, revision_id).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Revisions touching `entity_id`, newest first
    pub async fn history(&self, entity_id: &str) -> Result<Vec<Revision>> {
        let mut revisions: Vec<Revision> = self
            .store
            .find(REVISIONS_COLLECTION, &Query::field_eq("entityId", entity_id))
            .await?
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(revision) => Some(revision),
                Err(e) => {
                    warn!(entity_id, "Skipping unreadable revision: {}", e);
                    None
                }
            })
            .collect();

        revisions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(revisions)
    }

    /// Administrative removal of a revision record. The entity is untouched.
    pub async fn remove_revision(&self, revision_id: &str) -> Result<()> {
        if !self.store.delete(REVISIONS_COLLECTION, revision_id).await? {
            return Err(ChronasError::NotFound(format!("revision {}", revision_id)));
        }
        warn!(revision_id, "Revision removed");
        Ok(())
    }
}

fn body_of<'a>(revision: &Revision, body: Option<&'a DiffMap>) -> Result<&'a DiffMap> {
    body.ok_or_else(|| {
        ChronasError::Internal(format!(
            "Revision {} has no body to replay ({:?}, reverted={})",
            revision.id, revision.revision_type, revision.reverted
        ))
    })
}

fn packed_to_body(packed: PackedRanges) -> Result<DiffMap> {
    match serde_json::to_value(packed)? {
        Value::Object(map) => Ok(map),
        _ => Err(ChronasError::Internal("Packed ranges did not serialize to an object".into())),
    }
}

fn body_to_packed(body: &DiffMap) -> Result<PackedRanges> {
    Ok(serde_json::from_value(Value::Object(body.clone()))?)
}
