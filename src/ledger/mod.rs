//! Revision ledger
//!
//! Records every mutation as an invertible revision and replays either side
//! on demand. Resource-specific apply logic lives behind [`ResourceHandler`].

pub mod resource;
pub mod revision;
pub mod service;

pub use resource::{EntityHandler, ResourceHandler, SnapshotHandler, TOMBSTONE};
pub use revision::{Resource, Revision, RevisionType, MANY_ENTITY_ID};
pub use service::RevisionLedger;
