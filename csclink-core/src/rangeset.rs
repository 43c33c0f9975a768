//! Sparse set of ledger indices
//!
//! A validating node reports which ledger versions it holds as a compact
//! string such as `"32570-32620,32622"`. [`RangeSet`] keeps that information
//! as a sorted list of closed intervals so that availability questions
//! ("does the node have every ledger from 100 to 250?") can be answered
//! locally, without another round trip.
//!
//! # Invariant
//!
//! Intervals are sorted by start, and no two intervals overlap or touch.
//! Adjacent intervals (`a.end + 1 == b.start`) are always merged, so any gap
//! between two stored intervals is a real gap.
//!
//! # Examples
//!
//! ```rust
//! use csclink_core::RangeSet;
//!
//! let mut ranges = RangeSet::new();
//! ranges.parse_and_add_ranges("1-3,5,7-9").unwrap();
//! assert_eq!(ranges.serialize(), "1-3,5-5,7-9");
//!
//! ranges.add_value(4).unwrap();
//! assert!(ranges.contains_range(2, 5));
//! ```

use crate::error::{Error, Result};
use std::fmt;

/// Closed interval `[start, end]`
type Interval = (u32, u32);

/// Sorted, merged set of closed integer intervals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<Interval>,
}

impl RangeSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Remove every interval
    pub fn reset(&mut self) {
        self.ranges.clear();
    }

    /// Whether the set holds no values at all
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Stored intervals, ascending
    pub fn intervals(&self) -> &[(u32, u32)] {
        &self.ranges
    }

    /// Insert `[start, end]` and re-merge
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRange` when `start > end`; the set is left
    /// untouched in that case.
    pub fn add_range(&mut self, start: u32, end: u32) -> Result<()> {
        if start > end {
            return Err(Error::InvalidRange { start, end });
        }
        self.ranges.push((start, end));
        self.ranges = merge_intervals(std::mem::take(&mut self.ranges));
        Ok(())
    }

    /// Insert a single value
    pub fn add_value(&mut self, value: u32) -> Result<()> {
        self.add_range(value, value)
    }

    /// Parse the node's `validated_ledgers` format and add every range
    ///
    /// The input is a comma-separated list whose items are either a single
    /// integer or a `start-end` pair. An empty string adds nothing.
    ///
    /// # Errors
    ///
    /// Returns `Error::ResponseFormat` for an item that is not a number or a
    /// pair of numbers, and `Error::InvalidRange` for a reversed pair. Items
    /// before the offending one have already been added.
    pub fn parse_and_add_ranges(&mut self, ranges: &str) -> Result<()> {
        for item in ranges.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (start, end) = match item.split_once('-') {
                Some((start, end)) => (parse_bound(start, item)?, parse_bound(end, item)?),
                None => {
                    let value = parse_bound(item, item)?;
                    (value, value)
                }
            };
            self.add_range(start, end)?;
        }
        Ok(())
    }

    /// Whether a single stored interval covers all of `[start, end]`
    pub fn contains_range(&self, start: u32, end: u32) -> bool {
        self.ranges
            .iter()
            .any(|&(lo, hi)| lo <= start && hi >= end)
    }

    /// Whether `value` is in the set
    pub fn contains_value(&self, value: u32) -> bool {
        self.contains_range(value, value)
    }

    /// Canonical `a-b,c-d` form, ascending
    pub fn serialize(&self) -> String {
        self.ranges
            .iter()
            .map(|(start, end)| format!("{}-{}", start, end))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

fn parse_bound(text: &str, item: &str) -> Result<u32> {
    text.trim()
        .parse()
        .map_err(|_| Error::ResponseFormat(format!("invalid ledger range: {:?}", item)))
}

/// Sort by start, then fold overlapping or touching intervals together.
fn merge_intervals(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.sort_by_key(|&(start, _)| start);

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        match merged.last_mut() {
            Some(current) if start <= current.1.saturating_add(1) => {
                current.1 = current.1.max(end);
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_merges_adjacent_ranges() {
        let mut ranges = RangeSet::new();
        ranges.add_range(1, 3).unwrap();
        ranges.add_range(5, 7).unwrap();
        assert_eq!(ranges.serialize(), "1-3,5-7");

        ranges.add_range(4, 4).unwrap();
        assert_eq!(ranges.serialize(), "1-7");
        assert_eq!(ranges.intervals(), &[(1, 7)]);
    }

    #[test]
    fn test_contains_range_respects_gaps() {
        let mut ranges = RangeSet::new();
        ranges.add_range(1, 3).unwrap();
        ranges.add_range(5, 7).unwrap();
        assert!(!ranges.contains_range(2, 6));
        assert!(ranges.contains_range(5, 7));

        ranges.add_value(4).unwrap();
        assert!(ranges.contains_range(2, 6));
    }

    #[test]
    fn test_parse_and_add_ranges() {
        let mut ranges = RangeSet::new();
        ranges.parse_and_add_ranges("1-3,5,7-9").unwrap();
        assert_eq!(ranges.serialize(), "1-3,5-5,7-9");
        assert!(ranges.contains_value(5));
        assert!(!ranges.contains_value(6));
    }

    #[test]
    fn test_parse_empty_string() {
        let mut ranges = RangeSet::new();
        ranges.parse_and_add_ranges("").unwrap();
        assert!(ranges.is_empty());
        assert_eq!(ranges.serialize(), "");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let mut ranges = RangeSet::new();
        let err = ranges.parse_and_add_ranges("1-3,abc").unwrap_err();
        assert!(matches!(err, Error::ResponseFormat(_)));
        // the valid prefix is kept
        assert_eq!(ranges.serialize(), "1-3");
    }

    #[test]
    fn test_invalid_range() {
        let mut ranges = RangeSet::new();
        let err = ranges.add_range(5, 2).unwrap_err();
        assert!(matches!(err, Error::InvalidRange { start: 5, end: 2 }));
        assert!(ranges.is_empty());

        let err = ranges.parse_and_add_ranges("9-4").unwrap_err();
        assert!(matches!(err, Error::InvalidRange { .. }));
    }

    #[test]
    fn test_overlapping_and_unsorted_inserts() {
        let mut ranges = RangeSet::new();
        ranges.add_range(20, 30).unwrap();
        ranges.add_range(1, 2).unwrap();
        ranges.add_range(25, 40).unwrap();
        ranges.add_range(10, 12).unwrap();
        assert_eq!(ranges.serialize(), "1-2,10-12,20-40");
    }

    #[test]
    fn test_reset() {
        let mut ranges = RangeSet::new();
        ranges.add_range(1, 100).unwrap();
        ranges.reset();
        assert!(ranges.is_empty());
        assert!(!ranges.contains_value(50));
    }

    #[test]
    fn test_upper_bound_does_not_overflow() {
        let mut ranges = RangeSet::new();
        ranges.add_range(u32::MAX - 1, u32::MAX).unwrap();
        ranges.add_value(u32::MAX).unwrap();
        assert_eq!(ranges.intervals(), &[(u32::MAX - 1, u32::MAX)]);
    }

    proptest! {
        #[test]
        fn prop_intervals_stay_disjoint_and_sorted(
            inserts in proptest::collection::vec((0u32..500, 0u32..20), 0..40)
        ) {
            let mut ranges = RangeSet::new();
            for (start, len) in &inserts {
                ranges.add_range(*start, start + len).unwrap();
            }
            for pair in ranges.intervals().windows(2) {
                let (a, b) = (pair[0], pair[1]);
                prop_assert!(a.0 <= a.1);
                prop_assert!(b.0 > a.1 + 1);
            }
            for (start, len) in &inserts {
                prop_assert!(ranges.contains_range(*start, start + len));
            }
        }
    }
}
