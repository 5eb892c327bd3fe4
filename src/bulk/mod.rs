//! Bulk area editing
//!
//! Multi-year edits first read every affected snapshot in ascending order and
//! compute the per-year diffs without writing anything. The whole chain is
//! recorded as one range-packed revision, and only then are the snapshots
//! saved, strictly one year after another. Re-aggregation then either runs
//! inline or is spawned onto the runtime depending on how many years the
//! edit spans.

use std::ops::RangeInclusive;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregate::{AggregationReport, Aggregator, Dimension, POPULATION_SLOT};
use crate::codec::{DiffMap, YearDiffs, MAX_RANGE_YEARS};
use crate::ledger::{Resource, Revision, RevisionLedger};
use crate::store::{DocumentStore, AREAS_COLLECTION};
use crate::types::{ChronasError, Result};

const RECORD_SLOTS: usize = POPULATION_SLOT + 1;

#[derive(Debug, Clone)]
pub struct BulkConfig {
    /// Edits spanning fewer years than this wait for re-aggregation
    pub blocking_year_span: i32,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            blocking_year_span: 11,
        }
    }
}

/// Partial province record. `None` leaves the slot as it is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvinceChange {
    pub ruler: Option<String>,
    pub culture: Option<String>,
    pub religion: Option<String>,
    pub capital: Option<String>,
    pub population: Option<i64>,
}

impl ProvinceChange {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    fn apply_to(&self, record: &Value) -> Value {
        let mut slots = record.as_array().cloned().unwrap_or_default();
        if slots.len() < RECORD_SLOTS {
            slots.resize(RECORD_SLOTS, Value::Null);
        }
        let strings = [&self.ruler, &self.culture, &self.religion, &self.capital];
        for (index, value) in strings.into_iter().enumerate() {
            if let Some(value) = value {
                slots[index] = Value::from(value.as_str());
            }
        }
        if let Some(population) = self.population {
            slots[POPULATION_SLOT] = Value::from(population);
        }
        Value::Array(slots)
    }
}

/// What a bulk edit changed
#[derive(Debug, Clone)]
pub struct BulkEdit {
    pub revision: Revision,
    /// Years whose snapshot was rewritten, ascending
    pub years: Vec<i32>,
}

/// Re-aggregation after a bulk edit
#[derive(Debug)]
pub enum Reaggregation {
    /// Ran before the edit call returned
    Completed(AggregationReport),
    /// Running in the background
    Deferred(JoinHandle<Result<AggregationReport>>),
}

#[derive(Debug)]
pub struct BulkOutcome {
    pub edit: BulkEdit,
    pub aggregation: Reaggregation,
}

/// Applies edits across ranges of yearly snapshots
pub struct AreaEditor {
    ledger: Arc<RevisionLedger>,
    store: Arc<dyn DocumentStore>,
    aggregator: Arc<Aggregator>,
    config: BulkConfig,
}

impl AreaEditor {
    pub fn new(ledger: Arc<RevisionLedger>, aggregator: Arc<Aggregator>, config: BulkConfig) -> Self {
        let store = ledger.store();
        Self {
            ledger,
            store,
            aggregator,
            config,
        }
    }

    /// Apply `change` to each listed province in every snapshot of `years`
    pub async fn update_many(
        &self,
        user: &str,
        years: RangeInclusive<i32>,
        provinces: &[String],
        change: &ProvinceChange,
    ) -> Result<BulkOutcome> {
        if change.is_empty() {
            return Err(ChronasError::BadRequest("Province change sets no slot".into()));
        }

        self.edit_years(user, years, |province, record| {
            if provinces.iter().any(|p| p == province) {
                Some(change.apply_to(record))
            } else {
                None
            }
        })
        .await
    }

    /// Replace `from` with `to` in `dimension` for every province of every
    /// snapshot of `years`
    pub async fn replace_all(
        &self,
        user: &str,
        years: RangeInclusive<i32>,
        dimension: Dimension,
        from: &str,
        to: &str,
    ) -> Result<BulkOutcome> {
        let slot = dimension.slot().ok_or_else(|| {
            ChronasError::BadRequest(format!("{} is derived and cannot be replaced", dimension))
        })?;

        self.edit_years(user, years, |_, record| {
            if record.get(slot).and_then(Value::as_str) != Some(from) {
                return None;
            }
            let mut replaced = record.clone();
            if let Some(slots) = replaced.as_array_mut() {
                slots[slot] = Value::from(to);
            }
            Some(replaced)
        })
        .await
    }

    /// Diff every year of `years` against what `rewrite` returns for its
    /// provinces, record the revision, apply the years in ascending order,
    /// then re-aggregate.
    ///
    /// A failed snapshot write after the revision is recorded returns
    /// `PartialBulkApply`; reverting that revision restores every year.
    async fn edit_years<F>(&self, user: &str, years: RangeInclusive<i32>, rewrite: F) -> Result<BulkOutcome>
    where
        F: Fn(&str, &Value) -> Option<Value>,
    {
        let (start, end) = (*years.start(), *years.end());
        if start > end {
            return Err(ChronasError::BadRequest(format!(
                "Year range {}..={} is empty",
                start, end
            )));
        }
        let span = i64::from(end) - i64::from(start) + 1;
        if span > MAX_RANGE_YEARS {
            return Err(ChronasError::BadRequest(format!(
                "Year range {}..={} spans {} years, at most {} allowed",
                start, end, span, MAX_RANGE_YEARS
            )));
        }

        let handler = Resource::Areas.handler(self.store.clone());
        let mut prev_by_year = YearDiffs::new();
        let mut next_by_year = YearDiffs::new();

        for year in years {
            let id = year.to_string();
            let Some(doc) = self.store.get(AREAS_COLLECTION, &id).await? else {
                warn!(year, "No snapshot for year, skipping");
                continue;
            };

            let mut prev = DiffMap::new();
            let mut next = DiffMap::new();
            for (province, record) in handler.current_body(&doc) {
                if let Some(updated) = rewrite(province.as_str(), &record) {
                    if updated != record {
                        next.insert(province.clone(), updated);
                        prev.insert(province, record);
                    }
                }
            }

            if next.is_empty() {
                continue;
            }
            prev_by_year.insert(year, prev);
            next_by_year.insert(year, next);
        }

        if next_by_year.is_empty() {
            return Err(ChronasError::BadRequest(format!(
                "Edit of years {}..={} changes nothing",
                start, end
            )));
        }

        let changed: Vec<i32> = next_by_year.keys().copied().collect();
        let revision = self
            .ledger
            .record_update_many(user, Resource::Areas, prev_by_year, next_by_year.clone())
            .await?;

        let mut last_applied = None;
        for (&year, next) in &next_by_year {
            if let Err(e) = handler.apply(&year.to_string(), next).await {
                error!(
                    revision_id = %revision.id,
                    failed_year = year,
                    last_applied = ?last_applied,
                    kind = e.kind(),
                    error = %e,
                    "Bulk edit stopped partway"
                );
                return Err(ChronasError::PartialBulkApply {
                    revision_id: revision.id,
                    last_applied,
                    failed_year: year,
                    reason: e.to_string(),
                });
            }
            debug!(year, provinces = next.len(), "Snapshot rewritten");
            last_applied = Some(year);
        }

        let edit = BulkEdit {
            revision,
            years: changed,
        };

        let aggregation = if span < i64::from(self.config.blocking_year_span) {
            Reaggregation::Completed(self.aggregator.run_all().await?)
        } else {
            let aggregator = self.aggregator.clone();
            let revision_id = edit.revision.id.clone();
            Reaggregation::Deferred(tokio::spawn(async move {
                let result = aggregator.run_all().await;
                match &result {
                    Ok(report) => info!(revision_id = %revision_id, records = report.records_written(), "Deferred aggregation finished"),
                    Err(e) => warn!(revision_id = %revision_id, kind = e.kind(), error = %e, "Deferred aggregation failed"),
                }
                result
            }))
        };

        info!(
            revision_id = %edit.revision.id,
            span,
            years = edit.years.len(),
            deferred = matches!(aggregation, Reaggregation::Deferred(_)),
            "Bulk area edit applied"
        );
        Ok(BulkOutcome { edit, aggregation })
    }
}
