//! Per-dimension influence series (`a_<dimension>_<value>` records)

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{population_of, Aggregator, Dimension, GeneralReligions, PassSummary};
use crate::store::METADATA_COLLECTION;
use crate::types::Result;

/// `[provinceCount, populationCount, populationSharePercent]` of one value in one year
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Influence {
    provinces: usize,
    population: i64,
    share: f64,
}

impl Influence {
    fn to_value(self) -> Value {
        json!([self.provinces, self.population, self.share])
    }
}

fn share_of(population: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let percent = population as f64 / total as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}

#[derive(Debug, Default)]
struct InfluenceSeries {
    current: Influence,
    entries: Vec<(i32, Influence)>,
}

impl InfluenceSeries {
    fn last_entry_year(&self) -> Option<i32> {
        self.entries.last().map(|(year, _)| *year)
    }

    fn is_active(&self) -> bool {
        self.current.provinces > 0
    }

    /// Record this year's occupancy. An entry is appended only when the
    /// province count moves; a rise from zero outside the first streamed
    /// year is preceded by a zero entry for the year before.
    fn observe(&mut self, year: i32, influence: Influence, first_year: bool) {
        if influence.provinces != self.current.provinces {
            if !self.is_active() && !first_year && self.last_entry_year() != Some(year - 1) {
                self.entries.push((year - 1, Influence::default()));
            }
            self.entries.push((year, influence));
        }
        self.current = influence;
    }

    fn vanish(&mut self, year: i32) {
        self.entries.push((year, Influence::default()));
        self.current = Influence::default();
    }

    fn checkpoint(&mut self, year: i32) {
        if self.is_active() && self.last_entry_year().map_or(true, |last| last < year) {
            self.entries.push((year, self.current));
        }
    }

    fn into_record(self, dimension: Dimension) -> Value {
        let data: Vec<Value> = self
            .entries
            .into_iter()
            .map(|(year, influence)| {
                let mut entry = Map::new();
                entry.insert(year.to_string(), influence.to_value());
                Value::Object(entry)
            })
            .collect();
        json!({ "type": format!("a_{}", dimension), "data": data })
    }
}

fn value_of<'a>(dimension: Dimension, record: &'a Value, general: &'a GeneralReligions) -> Option<&'a str> {
    match dimension.slot() {
        Some(slot) => record.get(slot)?.as_str(),
        None => general.get(record.get(2)?.as_str()?),
    }
}

impl Aggregator {
    /// Stream every snapshot once and overwrite the influence series of
    /// every value `dimension` takes.
    pub async fn aggregate_dimension(&self, dimension: Dimension) -> Result<PassSummary> {
        let general = match dimension {
            Dimension::ReligionGeneral => self.general_religions().await?,
            _ => GeneralReligions::default(),
        };
        let mut cursor = self.open_cursor().await?;
        let mut series: BTreeMap<String, InfluenceSeries> = BTreeMap::new();

        while let Some(snapshot) = cursor.next().await? {
            let year = snapshot.year;
            let first_year = cursor.years == 1;

            let mut tally: BTreeMap<&str, (usize, i64)> = BTreeMap::new();
            let mut total_population = 0i64;
            for record in snapshot.provinces.values() {
                let population = population_of(record);
                total_population += population;
                if let Some(value) = value_of(dimension, record, &general) {
                    let slot = tally.entry(value).or_default();
                    slot.0 += 1;
                    slot.1 += population;
                }
            }

            for (value, (provinces, population)) in &tally {
                let influence = Influence {
                    provinces: *provinces,
                    population: *population,
                    share: share_of(*population, total_population),
                };
                series
                    .entry(value.to_string())
                    .or_default()
                    .observe(year, influence, first_year);
            }

            for (value, s) in series.iter_mut() {
                if s.is_active() && !tally.contains_key(value.as_str()) {
                    s.vanish(year);
                }
            }
        }

        debug!(dimension = %dimension, values = series.len(), years = cursor.years, "Dimension pass streamed");

        let checkpoint = self.config.checkpoint_year;
        let mut written = 0;
        for (value, mut s) in series {
            s.checkpoint(checkpoint);
            self.store
                .put(METADATA_COLLECTION, &dimension.record_id(&value), s.into_record(dimension))
                .await?;
            written += 1;
        }

        info!(dimension = %dimension, records = written, "Influence series written");
        Ok(cursor.summary(written))
    }
}
