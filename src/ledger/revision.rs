//! Revision records
//!
//! A revision stores enough of both sides of one mutation to replay either
//! of them. Only the `reverted` flag changes after creation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::DiffMap;
use crate::store::{AREAS_COLLECTION, MARKERS_COLLECTION, METADATA_COLLECTION};
use crate::types::ChronasError;

/// Entity id marking a batched multi-snapshot revision
pub const MANY_ENTITY_ID: &str = "MANY";

/// Kind of mutation a revision records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RevisionType {
    Create,
    Update,
    Delete,
}

/// Resource a revision applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Markers,
    Metadata,
    Areas,
}

impl Resource {
    pub fn collection(&self) -> &'static str {
        match self {
            Resource::Markers => MARKERS_COLLECTION,
            Resource::Metadata => METADATA_COLLECTION,
            Resource::Areas => AREAS_COLLECTION,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

impl FromStr for Resource {
    type Err = ChronasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            MARKERS_COLLECTION => Ok(Resource::Markers),
            METADATA_COLLECTION => Ok(Resource::Metadata),
            AREAS_COLLECTION => Ok(Resource::Areas),
            other => Err(ChronasError::BadRequest(format!("Unknown resource '{}'", other))),
        }
    }
}

/// One recorded mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "type")]
    pub revision_type: RevisionType,

    /// Entity id, or [`MANY_ENTITY_ID`] for range-packed batches
    pub entity_id: String,

    /// Slot inside the entity's `data` map for single-slot updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_entity_id: Option<String>,

    pub resource: Resource,

    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_body: Option<DiffMap>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_body: Option<DiffMap>,

    #[serde(default)]
    pub reverted: bool,

    pub timestamp: DateTime<Utc>,
}

impl Revision {
    pub fn new(
        revision_type: RevisionType,
        resource: Resource,
        entity_id: &str,
        user: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            revision_type,
            entity_id: entity_id.to_string(),
            sub_entity_id: None,
            resource,
            user: user.to_string(),
            prev_body: None,
            next_body: None,
            reverted: false,
            timestamp: Utc::now(),
        }
    }

    pub fn with_bodies(mut self, prev: Option<DiffMap>, next: Option<DiffMap>) -> Self {
        self.prev_body = prev;
        self.next_body = next;
        self
    }

    pub fn with_sub_entity(mut self, sub_entity_id: &str) -> Self {
        self.sub_entity_id = Some(sub_entity_id.to_string());
        self
    }

    pub fn is_batch(&self) -> bool {
        self.entity_id == MANY_ENTITY_ID
    }

    /// Body a revert should replay given the current flag:
    /// `prevBody` while applied, `nextBody` once reverted.
    pub fn replay_body(&self) -> Option<&DiffMap> {
        if self.reverted {
            self.next_body.as_ref()
        } else {
            self.prev_body.as_ref()
        }
    }
}
