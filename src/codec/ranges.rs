//! Range packing for per-year diff maps
//!
//! A batched edit touching many consecutive years usually applies the same
//! diff to each of them. Packing stores one body per run of adjacent years
//! with equal bodies, keyed `"start"` (single year) or `"start-end"`
//! (inclusive). Negative years are allowed: `"-50--48"` is `-50..=-48`.

use std::collections::BTreeMap;

use tracing::warn;

use super::diff::DiffMap;
use crate::types::{ChronasError, Result};

/// Year → diff body, ordered by year
pub type YearDiffs = BTreeMap<i32, DiffMap>;

/// Range key → diff body
pub type PackedRanges = BTreeMap<String, DiffMap>;

/// Widest run a single range key may cover. Wider keys are malformed and
/// packing splits longer runs.
pub const MAX_RANGE_YEARS: i64 = 10_000;

fn width(start: i32, end: i32) -> i64 {
    i64::from(end) - i64::from(start) + 1
}

/// Pack a year → diff map into ranges.
///
/// Years are sorted numerically before the walk. A year given twice is
/// rejected with `DuplicateYear`.
pub fn pack_ranges<I>(year_diffs: I) -> Result<PackedRanges>
where
    I: IntoIterator<Item = (i32, DiffMap)>,
{
    let mut sorted: Vec<(i32, DiffMap)> = year_diffs.into_iter().collect();
    sorted.sort_by_key(|(year, _)| *year);

    if let Some(pair) = sorted.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        return Err(ChronasError::DuplicateYear(pair[0].0));
    }

    let mut packed = PackedRanges::new();
    let mut entries = sorted.into_iter();
    let Some((first_year, first_body)) = entries.next() else {
        return Ok(packed);
    };

    let mut start = first_year;
    let mut end = first_year;
    let mut body = first_body;

    for (year, next_body) in entries {
        if year == end + 1 && next_body == body && width(start, end) < MAX_RANGE_YEARS {
            end = year;
            continue;
        }
        packed.insert(range_key(start, end), body);
        start = year;
        end = year;
        body = next_body;
    }
    packed.insert(range_key(start, end), body);

    Ok(packed)
}

/// Expand packed ranges back into one entry per year.
///
/// Malformed keys, including ranges wider than `MAX_RANGE_YEARS`, produce
/// no entries. Two keys covering the same year are
/// rejected with `DuplicateYear`.
pub fn unpack_ranges(packed: &PackedRanges) -> Result<YearDiffs> {
    let mut years = YearDiffs::new();

    for (key, body) in packed {
        let (start, end) = match parse_range_key(key) {
            Ok(bounds) => bounds,
            Err(e) => {
                warn!(key = %key, kind = e.kind(), error = %e, "Skipping malformed range key");
                continue;
            }
        };

        for year in start..=end {
            if years.insert(year, body.clone()).is_some() {
                return Err(ChronasError::DuplicateYear(year));
            }
        }
    }

    Ok(years)
}

/// Parse `"start"` or `"start-end"` into inclusive bounds
pub fn parse_range_key(key: &str) -> Result<(i32, i32)> {
    let malformed = || ChronasError::MalformedRange(key.to_string());

    // A leading '-' is the sign of the start year, not the separator.
    let separator = key
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '-')
        .map(|(i, _)| i);

    let (start, end) = match separator {
        Some(i) => (&key[..i], &key[i + 1..]),
        None => (key, key),
    };

    let start: i32 = start.trim().parse().map_err(|_| malformed())?;
    let end: i32 = end.trim().parse().map_err(|_| malformed())?;

    if start > end || width(start, end) > MAX_RANGE_YEARS {
        return Err(malformed());
    }
    Ok((start, end))
}

fn range_key(start: i32, end: i32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}-{}", start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn body(value: Value) -> DiffMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_pack_merges_adjacent_equal_years() {
        let packed = pack_ranges([
            (1850, body(json!({ "ruler": "SWE" }))),
            (1851, body(json!({ "ruler": "SWE" }))),
            (1852, body(json!({ "ruler": "DAN" }))),
        ])
        .unwrap();

        let expected: PackedRanges = [
            ("1850-1851".to_string(), body(json!({ "ruler": "SWE" }))),
            ("1852".to_string(), body(json!({ "ruler": "DAN" }))),
        ]
        .into_iter()
        .collect();
        assert_eq!(packed, expected);
    }

    #[test]
    fn test_pack_sorts_and_respects_gaps() {
        let same = body(json!({ "culture": "danish" }));
        let packed = pack_ranges([
            (1903, same.clone()),
            (1900, same.clone()),
            (1901, same.clone()),
        ])
        .unwrap();

        assert_eq!(packed.len(), 2);
        assert!(packed.contains_key("1900-1901"));
        assert!(packed.contains_key("1903"));
    }

    #[test]
    fn test_pack_rejects_duplicate_years() {
        let err = pack_ranges([
            (1850, body(json!({ "a": 1 }))),
            (1850, body(json!({ "a": 2 }))),
        ])
        .unwrap_err();
        assert!(matches!(err, ChronasError::DuplicateYear(1850)));
    }

    #[test]
    fn test_unpack_expands_inclusive_ranges() {
        let packed: PackedRanges = [
            ("1850-1852".to_string(), body(json!({ "x": 1 }))),
            ("1900".to_string(), body(json!({ "x": 2 }))),
        ]
        .into_iter()
        .collect();

        let years = unpack_ranges(&packed).unwrap();
        assert_eq!(years.keys().copied().collect::<Vec<_>>(), vec![1850, 1851, 1852, 1900]);
        assert_eq!(years[&1851]["x"], 1);
        assert_eq!(years[&1900]["x"], 2);
    }

    #[test]
    fn test_unpack_skips_malformed_keys() {
        let packed: PackedRanges = [
            ("18x0-1852".to_string(), body(json!({ "x": 1 }))),
            ("1852-1850".to_string(), body(json!({ "x": 1 }))),
            ("abc".to_string(), body(json!({ "x": 1 }))),
            ("1860".to_string(), body(json!({ "x": 3 }))),
        ]
        .into_iter()
        .collect();

        let years = unpack_ranges(&packed).unwrap();
        assert_eq!(years.len(), 1);
        assert!(years.contains_key(&1860));
        assert!(matches!(
            parse_range_key("18x0-1852"),
            Err(ChronasError::MalformedRange(_))
        ));
    }

    #[test]
    fn test_oversized_ranges_are_malformed() {
        assert!(matches!(
            parse_range_key("0-2000000000"),
            Err(ChronasError::MalformedRange(_))
        ));
        assert!(matches!(
            parse_range_key("-2147483648-2147483647"),
            Err(ChronasError::MalformedRange(_))
        ));
        assert_eq!(parse_range_key("1-10000").unwrap(), (1, 10_000));

        let packed: PackedRanges = [
            ("0-2000000000".to_string(), body(json!({ "x": 1 }))),
            ("1850".to_string(), body(json!({ "x": 2 }))),
        ]
        .into_iter()
        .collect();
        let years = unpack_ranges(&packed).unwrap();
        assert_eq!(years.keys().copied().collect::<Vec<_>>(), vec![1850]);
    }

    #[test]
    fn test_pack_splits_runs_wider_than_limit() {
        let same = body(json!({ "r": "ROM" }));
        let packed = pack_ranges((1..=10_001).map(|year| (year, same.clone()))).unwrap();
        assert_eq!(packed.len(), 2);
        assert!(packed.contains_key("1-10000"));
        assert!(packed.contains_key("10001"));
        assert_eq!(unpack_ranges(&packed).unwrap().len(), 10_001);
    }

    #[test]
    fn test_negative_years() {
        assert_eq!(parse_range_key("-50").unwrap(), (-50, -50));
        assert_eq!(parse_range_key("-50--48").unwrap(), (-50, -48));
        assert_eq!(parse_range_key("-2-3").unwrap(), (-2, 3));

        let same = body(json!({ "ruler": "ROM" }));
        let packed = pack_ranges([(-50, same.clone()), (-49, same.clone()), (-48, same)]).unwrap();
        assert!(packed.contains_key("-50--48"));
        assert_eq!(unpack_ranges(&packed).unwrap().len(), 3);
    }

    #[test]
    fn test_round_trip_is_idempotent_when_unpacked() {
        // Not canonical: 1850 and 1851 share a body but are split.
        let packed: PackedRanges = [
            ("1850".to_string(), body(json!({ "r": "SWE" }))),
            ("1851-1853".to_string(), body(json!({ "r": "SWE" }))),
            ("1855-1856".to_string(), body(json!({ "r": "DAN" }))),
        ]
        .into_iter()
        .collect();

        let unpacked = unpack_ranges(&packed).unwrap();
        let repacked = pack_ranges(unpacked.clone()).unwrap();
        assert_ne!(repacked, packed);
        assert!(repacked.contains_key("1850-1853"));
        assert_eq!(unpack_ranges(&repacked).unwrap(), unpacked);
    }

    #[test]
    fn test_unpack_rejects_overlapping_ranges() {
        let packed: PackedRanges = [
            ("1850-1852".to_string(), body(json!({ "x": 1 }))),
            ("1852".to_string(), body(json!({ "x": 2 }))),
        ]
        .into_iter()
        .collect();
        assert!(matches!(
            unpack_ranges(&packed),
            Err(ChronasError::DuplicateYear(1852))
        ));
    }
}
