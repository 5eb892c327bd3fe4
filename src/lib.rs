//! Chronas core - temporal revision and link-graph engine
//!
//! The core of a geo-historical data API: yearly province snapshots, map
//! markers and metadata records, every edit to them kept as a revertible
//! revision.
//!
//! ## Components
//!
//! - **Codec**: shallow diffs and year-range packing of per-year diffs
//! - **Links**: symmetric typed edges between markers and metadata records
//! - **Ledger**: invertible revisions with revert/re-apply toggling
//! - **Aggregate**: streamed per-province and per-dimension timelines
//! - **Bulk**: multi-year snapshot edits with threshold-based re-aggregation
//! - **Cache**: init-state cache invalidated by ledger writes

pub mod aggregate;
pub mod bulk;
pub mod cache;
pub mod codec;
pub mod config;
pub mod db;
pub mod ledger;
pub mod links;
pub mod reputation;
pub mod store;
pub mod types;

pub use aggregate::{AggregationReport, Aggregator, AggregatorConfig, Dimension};
pub use bulk::{AreaEditor, BulkConfig, BulkOutcome, ProvinceChange, Reaggregation};
pub use cache::{CacheConfig, InitCache};
pub use config::Args;
pub use ledger::{Resource, Revision, RevisionLedger, RevisionType};
pub use links::{EdgeKey, Endpoint, LinkGraph, LinkTag};
pub use store::{DocumentStore, InMemoryStore};
pub use types::{ChronasError, Result};
