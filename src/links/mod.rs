//! Link graph
//!
//! Markers and metadata records are connected by typed, symmetric edges. The
//! whole adjacency lives in the `data` map of the metadata record `links`:
//!
//! ```text
//! "0:<markerId>"   -> [[[markerId, tag], ...], [[metadataId, tag], ...]]
//! "1:<metadataId>" -> [[...], [...]]   or   -1 once both lists are empty
//! ```
//!
//! An edge X–Y is stored twice: Y inside X's pair and X inside Y's pair.

pub mod audit;
pub mod graph;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ledger::TOMBSTONE;
use crate::store::{MARKERS_COLLECTION, METADATA_COLLECTION};
use crate::types::{ChronasError, Result};

pub use audit::AsymmetricEdge;
pub use graph::LinkGraph;

/// Id of the metadata record holding the adjacency map
pub const LINKS_ID: &str = "links";

/// Kind of entity an edge endpoint refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Marker,
    Metadata,
}

impl EntityKind {
    /// Numeric accessor used in edge keys and as the pair index
    pub fn accessor(&self) -> u8 {
        match self {
            EntityKind::Marker => 0,
            EntityKind::Metadata => 1,
        }
    }

    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Marker => MARKERS_COLLECTION,
            EntityKind::Metadata => METADATA_COLLECTION,
        }
    }

    fn from_accessor(accessor: &str) -> Option<Self> {
        match accessor {
            "0" => Some(EntityKind::Marker),
            "1" => Some(EntityKind::Metadata),
            _ => None,
        }
    }
}

/// Where a linked item is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkTag {
    /// Visible on the map
    #[serde(rename = "a")]
    Map,
    /// Visible in the media view
    #[serde(rename = "e")]
    Media,
    #[serde(rename = "b")]
    Both,
}

impl LinkTag {
    pub fn on_map(&self) -> bool {
        matches!(self, LinkTag::Map | LinkTag::Both)
    }

    pub fn on_media(&self) -> bool {
        matches!(self, LinkTag::Media | LinkTag::Both)
    }

    /// Tag after re-adding an existing edge with `requested`.
    /// `Both` only ever widens; it is never narrowed back.
    pub fn widen(self, requested: LinkTag) -> LinkTag {
        if requested == LinkTag::Both {
            LinkTag::Both
        } else {
            self
        }
    }
}

impl FromStr for LinkTag {
    type Err = ChronasError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "a" => Ok(LinkTag::Map),
            "e" => Ok(LinkTag::Media),
            "b" => Ok(LinkTag::Both),
            other => Err(ChronasError::BadRequest(format!("Unknown link tag '{}'", other))),
        }
    }
}

/// Key of one entity's slot in the links record: `"<accessor>:<id>"`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EdgeKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn marker(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Marker, id)
    }

    pub fn metadata(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Metadata, id)
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.accessor(), self.id)
    }
}

impl FromStr for EdgeKey {
    type Err = ChronasError;

    fn from_str(s: &str) -> Result<Self> {
        let (accessor, id) = s
            .split_once(':')
            .ok_or_else(|| ChronasError::BadRequest(format!("Malformed edge key '{}'", s)))?;
        let kind = EntityKind::from_accessor(accessor)
            .ok_or_else(|| ChronasError::BadRequest(format!("Unknown accessor in '{}'", s)))?;
        if id.is_empty() {
            return Err(ChronasError::BadRequest(format!("Empty id in edge key '{}'", s)));
        }
        Ok(EdgeKey::new(kind, id))
    }
}

/// One end of an edge being added, with the tag it should carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub key: EdgeKey,
    pub tag: LinkTag,
}

impl Endpoint {
    pub fn new(key: EdgeKey, tag: LinkTag) -> Self {
        Self { key, tag }
    }
}

/// `[entityId, tag]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry(pub String, pub LinkTag);

/// `[markerEdges, metadataEdges]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjacencyPair(pub Vec<LinkEntry>, pub Vec<LinkEntry>);

impl AdjacencyPair {
    pub fn list(&self, kind: EntityKind) -> &[LinkEntry] {
        match kind {
            EntityKind::Marker => &self.0,
            EntityKind::Metadata => &self.1,
        }
    }

    pub fn list_mut(&mut self, kind: EntityKind) -> &mut Vec<LinkEntry> {
        match kind {
            EntityKind::Marker => &mut self.0,
            EntityKind::Metadata => &mut self.1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty() && self.1.is_empty()
    }

    pub fn contains(&self, key: &EdgeKey) -> bool {
        self.list(key.kind).iter().any(|entry| entry.0 == key.id)
    }

    /// Every entry with the edge key of the entity it points to
    pub fn entries(&self) -> impl Iterator<Item = (EdgeKey, LinkTag)> + '_ {
        let markers = self.0.iter().map(|e| (EdgeKey::marker(e.0.clone()), e.1));
        let metadata = self.1.iter().map(|e| (EdgeKey::metadata(e.0.clone()), e.1));
        markers.chain(metadata)
    }

    /// Add `other` with `tag`, or widen the stored tag. Returns whether the
    /// pair changed.
    pub fn upsert(&mut self, other: &EdgeKey, tag: LinkTag) -> bool {
        let list = self.list_mut(other.kind);
        match list.iter_mut().find(|entry| entry.0 == other.id) {
            Some(entry) => {
                let widened = entry.1.widen(tag);
                let changed = widened != entry.1;
                entry.1 = widened;
                changed
            }
            None => {
                list.push(LinkEntry(other.id.clone(), tag));
                true
            }
        }
    }

    /// Drop `other`. Returns whether the pair changed.
    pub fn remove(&mut self, other: &EdgeKey) -> bool {
        let list = self.list_mut(other.kind);
        let before = list.len();
        list.retain(|entry| entry.0 != other.id);
        list.len() != before
    }

    /// Stored form: the pair, or the tombstone when both lists are empty
    pub fn to_slot_value(&self) -> Result<Value> {
        if self.is_empty() {
            Ok(Value::from(TOMBSTONE))
        } else {
            Ok(serde_json::to_value(self)?)
        }
    }

    /// Read a stored slot. Absent and tombstoned slots read as empty.
    pub fn from_slot_value(value: Option<&Value>) -> Result<Self> {
        match value {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(v) if v.as_i64() == Some(TOMBSTONE) => Ok(Self::default()),
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
                ChronasError::Internal(format!("Corrupt adjacency slot {}: {}", v, e))
            }),
        }
    }
}

/// Uniform projection of a linked marker or metadata record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub geometry: Option<Value>,
}

impl Feature {
    /// Project a stored document. `coo` becomes a point geometry; metadata
    /// without coordinates falls back to `data.geojson`.
    pub fn from_document(kind: EntityKind, doc: &Value) -> Option<Self> {
        let fields = doc.as_object()?;
        let id = fields.get("_id")?.clone();

        let mut properties: Map<String, Value> = fields
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "_id" | "coo"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        properties.insert("id".to_string(), id);
        properties.insert("accessor".to_string(), Value::from(kind.accessor()));

        let geometry = match fields.get("coo") {
            Some(coo) if !coo.is_null() => Some(serde_json::json!({
                "type": "Point",
                "coordinates": coo,
            })),
            _ => fields
                .get("data")
                .and_then(|data| data.get("geojson"))
                .cloned(),
        };

        Some(Self {
            properties,
            geometry,
        })
    }
}

/// Result of [`LinkGraph::get_linked`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedItems {
    pub map_items: Vec<Feature>,
    pub media_items: Vec<Feature>,
}
