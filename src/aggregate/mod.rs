//! Timeline aggregation
//!
//! Both passes stream the yearly snapshots once in ascending year order and
//! keep only per-province or per-value running state, never the whole
//! timeline. Derived records are written into `metadata` and overwritten on
//! every run:
//!
//! - `ap_<province>`: sparse change log of one province
//! - `a_<dimension>_<value>`: influence series of one ruler, culture, religion
//!   or general religion
//!
//! A cursor failure mid-stream surfaces as `StreamAbort`. Records written
//! before the failure are not rolled back.

mod dimension;
mod provinces;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::store::{DocumentStream, DocumentStore, AREAS_COLLECTION, METADATA_COLLECTION};
use crate::types::{ChronasError, Result};

/// Slot of the population count in a province record
pub(crate) const POPULATION_SLOT: usize = 4;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Year at which still-active dimension values get a closing entry
    pub checkpoint_year: i32,
    /// Population is sampled every `population_interval` years
    pub population_interval: i32,
    /// Metadata record mapping each religion to its classification
    pub religion_metadata_id: String,
    /// Index of the general religion inside a religion entry
    pub general_religion_index: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            checkpoint_year: 2000,
            population_interval: 100,
            religion_metadata_id: "religion".to_string(),
            general_religion_index: 3,
        }
    }
}

/// Province attribute an influence series is computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Dimension {
    Ruler,
    Culture,
    Religion,
    ReligionGeneral,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Ruler,
        Dimension::Culture,
        Dimension::Religion,
        Dimension::ReligionGeneral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Ruler => "ruler",
            Dimension::Culture => "culture",
            Dimension::Religion => "religion",
            Dimension::ReligionGeneral => "religionGeneral",
        }
    }

    /// Slot in the province record. The general religion is not stored
    /// there; it is derived from the religion slot.
    pub fn slot(&self) -> Option<usize> {
        match self {
            Dimension::Ruler => Some(0),
            Dimension::Culture => Some(1),
            Dimension::Religion => Some(2),
            Dimension::ReligionGeneral => None,
        }
    }

    /// Id of the derived record for `value`
    pub fn record_id(&self, value: &str) -> String {
        format!("a_{}_{}", self.as_str(), value)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = ChronasError;

    fn from_str(s: &str) -> Result<Self> {
        Dimension::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ChronasError::BadRequest(format!("Unknown dimension '{}'", s)))
    }
}

/// Outcome of one streaming pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassSummary {
    pub years_streamed: usize,
    pub first_year: Option<i32>,
    pub last_year: Option<i32>,
    pub records_written: usize,
}

/// Outcome of [`Aggregator::run_all`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationReport {
    pub provinces: PassSummary,
    pub dimensions: Vec<(Dimension, PassSummary)>,
}

impl AggregationReport {
    pub fn records_written(&self) -> usize {
        self.provinces.records_written
            + self
                .dimensions
                .iter()
                .map(|(_, summary)| summary.records_written)
                .sum::<usize>()
    }
}

/// General religion per religion, read from the religion metadata record
#[derive(Debug, Clone, Default)]
pub(crate) struct GeneralReligions(HashMap<String, String>);

impl GeneralReligions {
    pub(crate) fn get(&self, religion: &str) -> Option<&str> {
        self.0.get(religion).map(String::as_str)
    }
}

/// One streamed snapshot
pub(crate) struct YearSnapshot {
    pub year: i32,
    pub provinces: serde_json::Map<String, Value>,
}

impl YearSnapshot {
    fn from_document(doc: Value) -> Option<Self> {
        let year = doc
            .get("year")
            .and_then(Value::as_i64)
            .or_else(|| doc.get("_id")?.as_str()?.parse().ok())
            .and_then(|y| i32::try_from(y).ok())?;
        let provinces = match doc.get("provinces") {
            Some(Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };
        Some(Self { year, provinces })
    }
}

/// Population of a province record, zero when missing or not a number
pub(crate) fn population_of(record: &Value) -> i64 {
    match record.get(POPULATION_SLOT) {
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_f64().map(|f| f.round() as i64))
            .unwrap_or(0),
        None => 0,
    }
}

/// Ascending snapshot cursor that tracks how far it got
pub(crate) struct SnapshotCursor {
    stream: DocumentStream,
    pub last_year: Option<i32>,
    pub first_year: Option<i32>,
    pub years: usize,
}

impl SnapshotCursor {
    /// Next snapshot, or `StreamAbort` if the cursor failed
    pub async fn next(&mut self) -> Result<Option<YearSnapshot>> {
        loop {
            let Some(item) = self.stream.next().await else {
                return Ok(None);
            };
            let doc = item.map_err(|e| ChronasError::StreamAbort {
                last_year: self.last_year,
                records_written: 0,
                reason: e.to_string(),
            })?;

            match YearSnapshot::from_document(doc) {
                Some(snapshot) => {
                    self.first_year.get_or_insert(snapshot.year);
                    self.last_year = Some(snapshot.year);
                    self.years += 1;
                    return Ok(Some(snapshot));
                }
                None => warn!(after = ?self.last_year, "Skipping snapshot without a year"),
            }
        }
    }

    fn summary(&self, records_written: usize) -> PassSummary {
        PassSummary {
            years_streamed: self.years,
            first_year: self.first_year,
            last_year: self.last_year,
            records_written,
        }
    }
}

/// Derives per-province and per-dimension records from the snapshots
pub struct Aggregator {
    store: Arc<dyn DocumentStore>,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, AggregatorConfig::default())
    }

    pub fn with_config(store: Arc<dyn DocumentStore>, config: AggregatorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub(crate) async fn open_cursor(&self) -> Result<SnapshotCursor> {
        let stream = self.store.stream_ascending_by(AREAS_COLLECTION, "year").await?;
        Ok(SnapshotCursor {
            stream,
            last_year: None,
            first_year: None,
            years: 0,
        })
    }

    pub(crate) async fn general_religions(&self) -> Result<GeneralReligions> {
        let id = &self.config.religion_metadata_id;
        let Some(doc) = self.store.get(METADATA_COLLECTION, id).await? else {
            debug!(id = %id, "No religion metadata, general religion series stays empty");
            return Ok(GeneralReligions::default());
        };

        let index = self.config.general_religion_index;
        let mapping = doc
            .get("data")
            .and_then(Value::as_object)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(religion, entry)| {
                        let general = entry.get(index)?.as_str()?;
                        Some((religion.clone(), general.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(GeneralReligions(mapping))
    }

    /// Run the province pass and every dimension pass, in that order
    pub async fn run_all(&self) -> Result<AggregationReport> {
        let mut report = AggregationReport {
            provinces: self.aggregate_provinces().await?,
            dimensions: Vec::with_capacity(Dimension::ALL.len()),
        };

        for dimension in Dimension::ALL {
            match self.aggregate_dimension(dimension).await {
                Ok(summary) => report.dimensions.push((dimension, summary)),
                Err(ChronasError::StreamAbort {
                    last_year,
                    records_written,
                    reason,
                }) => {
                    return Err(ChronasError::StreamAbort {
                        last_year,
                        records_written: records_written + report.records_written(),
                        reason,
                    })
                }
                Err(e) => return Err(e),
            }
        }

        info!(records = report.records_written(), "Aggregation finished");
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::InMemoryStore;

    /// Snapshots keyed by year, written the way the areas collection stores them
    pub(crate) async fn seed_snapshots(store: &InMemoryStore, snapshots: &[(i32, Value)]) {
        for (year, provinces) in snapshots {
            store
                .put(
                    AREAS_COLLECTION,
                    &year.to_string(),
                    json!({ "year": year, "provinces": provinces }),
                )
                .await
                .unwrap();
        }
    }

    pub(crate) async fn seed_religions(store: &InMemoryStore) {
        store
            .put(
                METADATA_COLLECTION,
                "religion",
                json!({
                    "type": "religion",
                    "data": {
                        "redo": ["Reformed", "#ff0", "w/Reformed", "Christianity"],
                        "luth": ["Lutheran", "#ee0", "w/Lutheran", "Christianity"],
                        "sunni": ["Sunni", "#0f0", "w/Sunni", "Islam"]
                    }
                }),
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_dimension_names() {
        assert_eq!("religionGeneral".parse::<Dimension>().unwrap(), Dimension::ReligionGeneral);
        assert_eq!("Ruler".parse::<Dimension>().unwrap(), Dimension::Ruler);
        assert!("population".parse::<Dimension>().is_err());
        assert_eq!(Dimension::Culture.record_id("swedish"), "a_culture_swedish");
        assert_eq!(Dimension::ReligionGeneral.slot(), None);
    }

    #[test]
    fn test_population_of() {
        assert_eq!(population_of(&json!(["SWE", "swedish", "redo", "Stockholm", 1001])), 1001);
        assert_eq!(population_of(&json!(["SWE", "swedish", "redo", "Stockholm", 10.6])), 11);
        assert_eq!(population_of(&json!(["SWE", null, null, null, null])), 0);
        assert_eq!(population_of(&json!(["SWE"])), 0);
    }

    #[tokio::test]
    async fn test_general_religions_from_metadata() {
        let store = Arc::new(InMemoryStore::new());
        seed_religions(&store).await;
        let aggregator = Aggregator::new(store);

        let general = aggregator.general_religions().await.unwrap();
        assert_eq!(general.get("redo"), Some("Christianity"));
        assert_eq!(general.get("sunni"), Some("Islam"));
        assert_eq!(general.get("unknown"), None);
    }

    #[tokio::test]
    async fn test_run_all_reports_every_pass() {
        let store = Arc::new(InMemoryStore::new());
        seed_religions(&store).await;
        seed_snapshots(
            &store,
            &[
                (1850, json!({ "Mentawai": ["SWE", "swedish", "redo", "Stockholm", 1001] })),
                (1851, json!({ "Mentawai": ["DAN", "swedish", "redo", "Stockholm", 1001] })),
            ],
        )
        .await;

        let report = Aggregator::new(store.clone()).run_all().await.unwrap();
        assert_eq!(report.provinces.years_streamed, 2);
        assert_eq!(report.provinces.records_written, 1);
        assert_eq!(report.dimensions.len(), 4);
        assert!(store.get(METADATA_COLLECTION, "a_ruler_DAN").await.unwrap().is_some());
        assert!(store
            .get(METADATA_COLLECTION, "a_religionGeneral_Christianity")
            .await
            .unwrap()
            .is_some());
    }
}
