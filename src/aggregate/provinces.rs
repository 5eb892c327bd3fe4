//! Per-province change log (`ap_<province>` records)

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{Aggregator, GeneralReligions, PassSummary, POPULATION_SLOT};
use crate::store::METADATA_COLLECTION;
use crate::types::Result;

/// Province record slots tracked for changes, with their series names
const TRACKED: [(&str, usize); 4] = [("ruler", 0), ("culture", 1), ("religion", 2), ("capital", 3)];
const RELIGION_SLOT: usize = 2;

/// Sparse `{year: value}` series with the value it currently holds
#[derive(Debug, Clone)]
struct Series {
    last: Value,
    entries: Vec<(i32, Value)>,
}

impl Series {
    fn start(year: i32, value: Value) -> Self {
        Self {
            last: value.clone(),
            entries: vec![(year, value)],
        }
    }

    /// Append `value` if it differs from the current one
    fn observe(&mut self, year: i32, value: Value) -> bool {
        if self.last == value {
            return false;
        }
        self.last = value.clone();
        self.entries.push((year, value));
        true
    }

    /// Only a value that changed after its first appearance is worth a series
    fn changed(&self) -> bool {
        self.entries.len() > 1
    }
}

fn to_entries(entries: &[(i32, Value)]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|(year, value)| {
                let mut entry = Map::new();
                entry.insert(year.to_string(), value.clone());
                Value::Object(entry)
            })
            .collect(),
    )
}

fn slot(record: &Value, index: usize) -> Value {
    record.get(index).cloned().unwrap_or(Value::Null)
}

/// Running state of one province
struct ProvinceLog {
    tracked: Vec<Series>,
    religion_general: Option<Series>,
    population: Vec<(i32, Value)>,
}

impl ProvinceLog {
    fn first_seen(year: i32, record: &Value, general: &GeneralReligions) -> Self {
        let religion_general = general_of(record, general).map(|g| Series::start(year, g));
        Self {
            tracked: TRACKED
                .iter()
                .map(|(_, index)| Series::start(year, slot(record, *index)))
                .collect(),
            religion_general,
            population: Vec::new(),
        }
    }

    fn observe(&mut self, year: i32, record: &Value, general: &GeneralReligions) {
        for (series, (_, index)) in self.tracked.iter_mut().zip(TRACKED.iter()) {
            let changed = series.observe(year, slot(record, *index));
            if changed && *index == RELIGION_SLOT {
                if let Some(g) = general_of(record, general) {
                    match self.religion_general.as_mut() {
                        Some(general_series) => {
                            general_series.observe(year, g);
                        }
                        None => self.religion_general = Some(Series::start(year, g)),
                    }
                }
            }
        }
    }

    fn sample_population(&mut self, year: i32, record: &Value) {
        match record.get(POPULATION_SLOT) {
            Some(value) if !value.is_null() => self.population.push((year, value.clone())),
            _ => {}
        }
    }

    fn into_record(self) -> Value {
        let mut data = Map::new();
        for (series, (name, _)) in self.tracked.iter().zip(TRACKED.iter()) {
            if series.changed() {
                data.insert(name.to_string(), to_entries(&series.entries));
            }
        }
        if let Some(series) = self.religion_general.as_ref().filter(|s| s.changed()) {
            data.insert("religionGeneral".to_string(), to_entries(&series.entries));
        }
        data.insert("population".to_string(), to_entries(&self.population));

        json!({ "type": "ap", "data": data })
    }
}

fn general_of(record: &Value, general: &GeneralReligions) -> Option<Value> {
    let religion = record.get(RELIGION_SLOT)?.as_str()?;
    general.get(religion).map(Value::from)
}

/// Id of the derived change log of `province`
pub fn province_record_id(province: &str) -> String {
    format!("ap_{}", province.to_lowercase())
}

impl Aggregator {
    /// Stream every snapshot once and overwrite the change log of each
    /// province seen.
    pub async fn aggregate_provinces(&self) -> Result<PassSummary> {
        let general = self.general_religions().await?;
        let interval = self.config.population_interval;
        let mut cursor = self.open_cursor().await?;
        let mut logs: BTreeMap<String, ProvinceLog> = BTreeMap::new();

        while let Some(snapshot) = cursor.next().await? {
            let year = snapshot.year;
            let sample = interval > 0 && year % interval == 0;

            for (province, record) in &snapshot.provinces {
                let log = match logs.entry(province.clone()) {
                    Entry::Occupied(entry) => {
                        let log = entry.into_mut();
                        log.observe(year, record, &general);
                        log
                    }
                    Entry::Vacant(entry) => entry.insert(ProvinceLog::first_seen(year, record, &general)),
                };
                if sample {
                    log.sample_population(year, record);
                }
            }
        }

        debug!(provinces = logs.len(), years = cursor.years, "Province pass streamed");

        let mut written = 0;
        for (province, log) in logs {
            self.store
                .put(METADATA_COLLECTION, &province_record_id(&province), log.into_record())
                .await?;
            written += 1;
        }

        info!(
            records = written,
            first_year = ?cursor.first_year,
            last_year = ?cursor.last_year,
            "Province change logs written"
        );
        Ok(cursor.summary(written))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::aggregate::tests::{seed_religions, seed_snapshots};
    use crate::store::testing::FlakyStore;
    use crate::store::{DocumentStore, InMemoryStore};
    use crate::types::ChronasError;

    async fn change_log(store: &dyn DocumentStore, province: &str) -> Value {
        store
            .get(METADATA_COLLECTION, &province_record_id(province))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_ruler_change() {
        let store = Arc::new(InMemoryStore::new());
        seed_snapshots(
            &store,
            &[
                (1850, json!({ "Mentawai": ["SWE", "swedish", "redo", "Stockholm", 1001] })),
                (1851, json!({ "Mentawai": ["DAN", "swedish", "redo", "Stockholm", 1001] })),
            ],
        )
        .await;

        let summary = Aggregator::new(store.clone()).aggregate_provinces().await.unwrap();
        assert_eq!(summary.years_streamed, 2);
        assert_eq!(summary.records_written, 1);

        let doc = change_log(store.as_ref(), "Mentawai").await;
        assert_eq!(doc["_id"], "ap_mentawai");
        assert_eq!(doc["type"], "ap");
        assert_eq!(doc["data"]["ruler"], json!([{ "1850": "SWE" }, { "1851": "DAN" }]));
        assert_eq!(doc["data"]["population"], json!([]));
        for absent in ["culture", "religion", "capital", "religionGeneral"] {
            assert!(doc["data"].get(absent).is_none(), "{} should be absent", absent);
        }
    }

    #[tokio::test]
    async fn test_population_sampled_at_centuries() {
        let store = Arc::new(InMemoryStore::new());
        seed_snapshots(
            &store,
            &[
                (1799, json!({ "Nias": ["SWE", "swedish", "redo", "Gunungsitoli", 700] })),
                (1800, json!({ "Nias": ["SWE", "swedish", "redo", "Gunungsitoli", 800] })),
                (1850, json!({ "Nias": ["SWE", "swedish", "redo", "Gunungsitoli", 900] })),
                (1900, json!({ "Nias": ["SWE", "swedish", "redo", "Gunungsitoli", null] })),
                (2000, json!({ "Nias": ["SWE", "swedish", "redo", "Gunungsitoli", 1200] })),
            ],
        )
        .await;

        Aggregator::new(store.clone()).aggregate_provinces().await.unwrap();

        let doc = change_log(store.as_ref(), "Nias").await;
        assert_eq!(doc["data"]["population"], json!([{ "1800": 800 }, { "2000": 1200 }]));
        assert!(doc["data"].get("ruler").is_none());
    }

    #[tokio::test]
    async fn test_general_religion_follows_religion_changes() {
        let store = Arc::new(InMemoryStore::new());
        seed_religions(&store).await;
        seed_snapshots(
            &store,
            &[
                (1500, json!({ "Aceh": ["ACE", "malay", "redo", "Banda", 10] })),
                (1501, json!({ "Aceh": ["ACE", "malay", "luth", "Banda", 10] })),
                (1502, json!({ "Aceh": ["ACE", "malay", "sunni", "Banda", 10] })),
            ],
        )
        .await;

        Aggregator::new(store.clone()).aggregate_provinces().await.unwrap();

        let doc = change_log(store.as_ref(), "Aceh").await;
        assert_eq!(
            doc["data"]["religion"],
            json!([{ "1500": "redo" }, { "1501": "luth" }, { "1502": "sunni" }])
        );
        // luth is still Christianity, so only the switch to Islam is logged
        assert_eq!(
            doc["data"]["religionGeneral"],
            json!([{ "1500": "Christianity" }, { "1502": "Islam" }])
        );
    }

    #[tokio::test]
    async fn test_late_province_and_rerun_overwrites() {
        let store = Arc::new(InMemoryStore::new());
        seed_snapshots(
            &store,
            &[
                (1000, json!({ "Gotland": ["SWE", "gutnish", "norse", "Visby", 5] })),
                (1001, json!({
                    "Gotland": ["DAN", "gutnish", "norse", "Visby", 5],
                    "Oland": ["SWE", "swedish", "norse", "Borgholm", 3]
                })),
                (1002, json!({
                    "Gotland": ["DAN", "gutnish", "norse", "Visby", 5],
                    "Oland": ["SWE", "swedish", "norse", "Kalmar", 3]
                })),
            ],
        )
        .await;

        let aggregator = Aggregator::new(store.clone());
        aggregator.aggregate_provinces().await.unwrap();
        let first = change_log(store.as_ref(), "Oland").await;
        assert_eq!(first["data"]["capital"], json!([{ "1001": "Borgholm" }, { "1002": "Kalmar" }]));
        assert_eq!(first["data"]["population"], json!([]));

        let summary = aggregator.aggregate_provinces().await.unwrap();
        assert_eq!(summary.records_written, 2);
        assert_eq!(change_log(store.as_ref(), "Oland").await, first);
        let gotland = change_log(store.as_ref(), "Gotland").await;
        assert_eq!(gotland["data"]["ruler"], json!([{ "1000": "SWE" }, { "1001": "DAN" }]));
        assert_eq!(gotland["data"]["population"], json!([{ "1000": 5 }]));
    }

    #[tokio::test]
    async fn test_cursor_failure_is_stream_abort() {
        let inner = InMemoryStore::new();
        seed_snapshots(
            &inner,
            &[
                (1850, json!({ "Mentawai": ["SWE", "swedish", "redo", "Stockholm", 1001] })),
                (1851, json!({ "Mentawai": ["DAN", "swedish", "redo", "Stockholm", 1001] })),
                (1852, json!({ "Mentawai": ["SWE", "swedish", "redo", "Stockholm", 1001] })),
            ],
        )
        .await;
        let store = Arc::new(FlakyStore::new(inner));
        store.abort_streams_after(2);

        let err = Aggregator::new(store.clone()).aggregate_provinces().await.unwrap_err();
        match err {
            ChronasError::StreamAbort { last_year, records_written, .. } => {
                assert_eq!(last_year, Some(1851));
                assert_eq!(records_written, 0);
            }
            other => panic!("expected StreamAbort, got {:?}", other),
        }
        assert!(store
            .get(METADATA_COLLECTION, "ap_mentawai")
            .await
            .unwrap()
            .is_none());
    }
}
