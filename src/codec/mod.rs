//! Diff codec
//!
//! Shallow structural diffs of flat records, and run-length packing of
//! per-year diff maps into inclusive `"start-end"` ranges.

pub mod diff;
pub mod ranges;

pub use diff::{apply_diff, shallow_diff, strip_ids, DiffMap};
pub use ranges::{
    pack_ranges, parse_range_key, unpack_ranges, PackedRanges, YearDiffs, MAX_RANGE_YEARS,
};
