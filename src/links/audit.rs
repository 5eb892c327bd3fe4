//! Symmetry audit for the links record
//!
//! Edge writes are two independent ledger entries, so a failure between
//! them leaves a half-edge behind. The audit lists such half-edges and the
//! repair adds each missing mirror entry through the ledger. Nothing here
//! runs automatically.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::graph::{LinkChange, LinkGraph};
use super::{AdjacencyPair, EdgeKey, Endpoint, LinkTag};
use crate::types::Result;

/// `from` lists `to` with `tag`, but `to` does not list `from`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AsymmetricEdge {
    #[serde(serialize_with = "serialize_key")]
    pub from: EdgeKey,
    #[serde(serialize_with = "serialize_key")]
    pub to: EdgeKey,
    pub tag: LinkTag,
}

fn serialize_key<S: serde::Serializer>(key: &EdgeKey, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(key)
}

impl LinkGraph {
    /// Every half-edge in the links record whose mirror is missing.
    /// Read-only: a missing links record has no half-edges.
    pub async fn audit_symmetry(&self) -> Result<Vec<AsymmetricEdge>> {
        let Some(doc) = self.read_links().await? else {
            info!("No links record, nothing to audit");
            return Ok(Vec::new());
        };
        let Some(slots) = doc.get("data").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };

        let mut broken = Vec::new();
        for (raw_key, value) in slots {
            let from: EdgeKey = match raw_key.parse() {
                Ok(key) => key,
                Err(e) => {
                    warn!(key = %raw_key, kind = e.kind(), error = %e, "Skipping unparseable links slot");
                    continue;
                }
            };
            let pair = match AdjacencyPair::from_slot_value(Some(value)) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(key = %raw_key, kind = e.kind(), error = %e, "Skipping corrupt links slot");
                    continue;
                }
            };

            for (to, tag) in pair.entries() {
                let mirror = Self::pair_of(&doc, &to).unwrap_or_default();
                if !mirror.contains(&from) {
                    broken.push(AsymmetricEdge {
                        from: from.clone(),
                        to,
                        tag,
                    });
                }
            }
        }

        info!(asymmetric = broken.len(), "Links audit finished");
        Ok(broken)
    }

    /// Add the missing mirror of every half-edge found by the audit.
    /// The mirror carries the same tag as the surviving half.
    pub async fn repair_asymmetric(&self, user: &str) -> Result<Vec<LinkChange>> {
        let broken = self.audit_symmetry().await?;
        let mut changes = Vec::with_capacity(broken.len());

        for edge in broken {
            let change = self
                .add_edge(
                    user,
                    &Endpoint::new(edge.from.clone(), edge.tag),
                    &Endpoint::new(edge.to.clone(), edge.tag),
                )
                .await?;
            info!(from = %edge.from, to = %edge.to, "Half-edge repaired");
            changes.push(change);
        }

        Ok(changes)
    }
}
