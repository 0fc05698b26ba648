// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! A sorted, merge-on-write interval index over non-negative integer keys.
//!
//! A [`RangeMap`] assigns values to runs of consecutive integer keys. It is
//! implemented as a sorted vector of non-overlapping [`RangeEntry`] items;
//! writes trim, split, and replace whatever they overlap, so after any
//! sequence of operations the entries stay sorted by start and pairwise
//! disjoint. Adjacent entries holding equal values are left unmerged; point
//! queries cannot tell the difference, and a range query stops at the entry
//! boundary either way, so callers already have to resume from the returned
//! length.
//!
//! We chose a vector-based representation because these maps stay small in
//! practice; lookups are a binary search over a dense `Vec`.

use std::fmt;

/// A run of consecutive integer keys sharing one value.
///
/// `length` is always at least 1; empty entries never exist in a map.
#[derive(Clone, PartialEq, Eq)]
pub struct RangeEntry<V> {
    /// First key of the run (inclusive).
    pub start: u64,
    /// Number of consecutive keys covered.
    pub length: u64,
    /// The value shared by every key in the run.
    pub value: V,
}

impl<V> RangeEntry<V> {
    /// First key past the run (exclusive end).
    pub fn end(&self) -> u64 {
        self.start + self.length
    }
}

impl<V: fmt::Debug> fmt::Debug for RangeEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}={:?}", self.start, self.end(), self.value)
    }
}

/// Result of a [`RangeMap::get_from_range`] query: the longest uniform prefix
/// of the queried range.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery<'a, V> {
    /// The value at the query start, or `None` in a gap.
    pub value: Option<&'a V>,
    /// How many keys from the query start share that value. Never exceeds
    /// the queried length; it runs to the first boundary (the end of the
    /// current entry, or the start of the next one).
    pub length: u64,
}

/// Sorted list of non-overlapping value runs over integer keys.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct RangeMap<V>(Vec<RangeEntry<V>>);

impl<V: fmt::Debug> fmt::Debug for RangeMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

impl<V> RangeMap<V> {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterator over the entries, sorted by start.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = &RangeEntry<V>> {
        self.0.iter()
    }

    /// Index of the first entry that ends after `key`: the entry containing
    /// `key`, or the nearest one after it.
    fn first_ending_after(&self, key: u64) -> usize {
        self.0.partition_point(|entry| entry.end() <= key)
    }

    /// Returns the longest prefix of `[start, start + length)` over which the
    /// map is uniform.
    ///
    /// If `start` falls inside an entry, the prefix carries that entry's
    /// value and runs to the entry's end. If `start` falls in a gap, the
    /// prefix carries no value and runs to the next entry. Either way the
    /// returned length is capped at `length`.
    #[must_use]
    pub fn get_from_range(&self, start: u64, length: u64) -> RangeQuery<'_, V> {
        let i = self.first_ending_after(start);
        let Some(entry) = self.0.get(i) else {
            return RangeQuery {
                value: None,
                length,
            };
        };
        if entry.start <= start {
            RangeQuery {
                value: Some(&entry.value),
                length: length.min(entry.end() - start),
            }
        } else {
            RangeQuery {
                value: None,
                length: length.min(entry.start - start),
            }
        }
    }

    /// Returns the first entry intersecting `[start, start + length)`, if any.
    #[must_use]
    pub fn get_first_entry_from_range(&self, start: u64, length: u64) -> Option<&RangeEntry<V>> {
        // an empty query range intersects nothing, even mid-entry
        if length == 0 {
            return None;
        }
        let entry = self.0.get(self.first_ending_after(start))?;
        (entry.start < start + length).then_some(entry)
    }
}

impl<V: Clone> RangeMap<V> {
    /// Assigns `value` to every key in `[start, start + length)`.
    ///
    /// All overlap is replaced by a single new entry; partially overlapped
    /// neighbours are trimmed, and an entry that strictly contains the range
    /// splits into prefix | new | suffix. Passing `None` for `value` is
    /// equivalent to [`Self::delete_from_range`].
    pub fn set_in_range(&mut self, start: u64, length: u64, value: impl Into<Option<V>>) {
        let Some(value) = value.into() else {
            return self.delete_from_range(start, length);
        };
        if length == 0 {
            return;
        }
        // carving out the target range first means the insert below never
        // overlaps anything
        self.delete_from_range(start, length);
        let i = self.first_ending_after(start);
        self.0.insert(
            i,
            RangeEntry {
                start,
                length,
                value,
            },
        );
    }

    /// Removes every key in `[start, start + length)` from the map.
    ///
    /// Fully covered entries disappear, partially covered neighbours are
    /// trimmed, and an entry that strictly contains the range splits in two.
    pub fn delete_from_range(&mut self, start: u64, length: u64) {
        if length == 0 {
            return;
        }
        let end = start + length;
        let mut i = self.first_ending_after(start);

        // an entry extending past both sides of the deletion splits in two
        if let Some(entry) = self.0.get(i) {
            if entry.start < start && end < entry.end() {
                let suffix = RangeEntry {
                    start: end,
                    length: entry.end() - end,
                    value: entry.value.clone(),
                };
                self.0[i].length = start - self.0[i].start;
                self.0.insert(i + 1, suffix);
                return;
            }
        }

        // trim an entry that begins before the deletion
        if let Some(entry) = self.0.get_mut(i) {
            if entry.start < start {
                entry.length = start - entry.start;
                i += 1;
            }
        }

        // drop the run of fully covered entries
        let covered = self.0[i..].partition_point(|entry| entry.end() <= end);
        self.0.drain(i..i + covered);

        // trim an entry that extends past the deletion
        if let Some(entry) = self.0.get_mut(i) {
            if entry.start < end {
                let cut = end - entry.start;
                entry.start = end;
                entry.length -= cut;
            }
        }
    }
}

impl<V: Clone> Extend<(u64, u64, V)> for RangeMap<V> {
    fn extend<T: IntoIterator<Item = (u64, u64, V)>>(&mut self, iter: T) {
        for (start, length, value) in iter {
            self.set_in_range(start, length, value);
        }
    }
}

impl<V: Clone> FromIterator<(u64, u64, V)> for RangeMap<V> {
    fn from_iter<T: IntoIterator<Item = (u64, u64, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entries<V: Clone>(map: &RangeMap<V>) -> Vec<(u64, u64, V)> {
        map.entries()
            .map(|e| (e.start, e.length, e.value.clone()))
            .collect()
    }

    fn assert_disjoint_sorted<V>(map: &RangeMap<V>) {
        for pair in map.0.windows(2) {
            assert!(
                pair[0].start + pair[0].length <= pair[1].start,
                "overlapping or unsorted entries"
            );
        }
        for entry in &map.0 {
            assert!(entry.length >= 1, "empty entry");
        }
    }

    #[test]
    fn empty_queries() {
        let map = RangeMap::<&str>::new();
        assert!(map.is_empty());
        let q = map.get_from_range(5, 10);
        assert_eq!(q.value, None);
        assert_eq!(q.length, 10);
        assert_eq!(map.get_first_entry_from_range(0, 100), None);
    }

    #[test]
    fn set_then_interior_set_splits() {
        let mut map = RangeMap::new();
        map.set_in_range(10, 5, "A");
        assert_eq!(entries(&map), [(10, 5, "A")]);

        map.set_in_range(12, 1, "B");
        assert_eq!(entries(&map), [(10, 2, "A"), (12, 1, "B"), (13, 2, "A")]);

        map.delete_from_range(11, 2);
        assert_eq!(entries(&map), [(10, 1, "A"), (13, 2, "A")]);
        assert_disjoint_sorted(&map);
    }

    #[test]
    fn set_replaces_overlap_and_trims_neighbours() {
        let mut map = RangeMap::new();
        map.set_in_range(0, 4, "A");
        map.set_in_range(6, 4, "B");
        map.set_in_range(2, 6, "C");
        assert_eq!(entries(&map), [(0, 2, "A"), (2, 6, "C"), (8, 2, "B")]);
        assert_disjoint_sorted(&map);
    }

    #[test]
    fn set_none_deletes() {
        let mut map = RangeMap::new();
        map.set_in_range(0, 10, "A");
        map.set_in_range(3, 4, None);
        assert_eq!(entries(&map), [(0, 3, "A"), (7, 3, "A")]);
    }

    #[test]
    fn delete_spanning_multiple_entries() {
        let mut map = RangeMap::new();
        map.set_in_range(0, 3, "A");
        map.set_in_range(4, 3, "B");
        map.set_in_range(8, 3, "C");
        map.delete_from_range(2, 7);
        assert_eq!(entries(&map), [(0, 2, "A"), (9, 2, "C")]);
        assert_disjoint_sorted(&map);
    }

    #[test]
    fn delete_exact_entry() {
        let mut map = RangeMap::new();
        map.set_in_range(4, 3, "B");
        map.delete_from_range(4, 3);
        assert!(map.is_empty());
    }

    #[test]
    fn get_from_range_stops_at_boundaries() {
        let mut map = RangeMap::new();
        map.set_in_range(10, 5, "A");

        // inside an entry, capped at its end
        let q = map.get_from_range(12, 100);
        assert_eq!(q.value, Some(&"A"));
        assert_eq!(q.length, 3);

        // inside an entry, capped at the query length
        let q = map.get_from_range(12, 2);
        assert_eq!(q.length, 2);

        // in a gap, the prefix runs to the next entry
        let q = map.get_from_range(4, 100);
        assert_eq!(q.value, None);
        assert_eq!(q.length, 6);
    }

    #[test]
    fn first_entry_from_range() {
        let mut map = RangeMap::new();
        map.set_in_range(10, 5, "A");
        map.set_in_range(20, 5, "B");

        assert_eq!(map.get_first_entry_from_range(0, 10), None);
        let e = map.get_first_entry_from_range(0, 11).unwrap();
        assert_eq!((e.start, e.length), (10, 5));
        let e = map.get_first_entry_from_range(16, 100).unwrap();
        assert_eq!((e.start, e.length), (20, 5));
        // a range beginning mid-entry intersects it
        let e = map.get_first_entry_from_range(12, 1).unwrap();
        assert_eq!(e.start, 10);
    }

    #[test]
    fn zero_length_range_intersects_nothing() {
        let mut map = RangeMap::new();
        map.set_in_range(10, 5, "A");

        // even a query starting inside an entry is empty at length zero
        assert_eq!(map.get_first_entry_from_range(12, 0), None);
        assert_eq!(map.get_first_entry_from_range(10, 0), None);
        assert_eq!(map.get_first_entry_from_range(0, 0), None);
    }

    /// Applies the same scripted writes to a `RangeMap` and to a naive
    /// per-key model, then checks both invariants and query answers.
    #[quickcheck]
    fn qc_matches_point_model(script: Vec<(u8, u8, Option<u8>)>) {
        let mut map = RangeMap::new();
        let mut model: BTreeMap<u64, u8> = BTreeMap::new();

        for (start, length, value) in script {
            let (start, length) = (start as u64, length as u64 % 16);
            match value {
                Some(v) => {
                    map.set_in_range(start, length, v);
                    for key in start..start + length {
                        model.insert(key, v);
                    }
                }
                None => {
                    map.delete_from_range(start, length);
                    for key in start..start + length {
                        model.remove(&key);
                    }
                }
            }
            assert_disjoint_sorted(&map);
        }

        // point lookups agree everywhere
        for key in 0..=u8::MAX as u64 + 16 {
            let q = map.get_from_range(key, 1);
            assert_eq!(q.value.copied(), model.get(&key).copied(), "at {key}");
            assert_eq!(q.length, 1);
        }

        // prefix lengths run to the first change of value
        for start in 0..=u8::MAX as u64 {
            let q = map.get_from_range(start, 16);
            let expected = (start..start + 16)
                .take_while(|key| model.get(key) == model.get(&start))
                .count() as u64;
            assert!(q.length <= 16);
            assert!(
                q.length <= expected,
                "uniform prefix overshot at {start}: {} > {expected}",
                q.length
            );
            // the returned prefix must itself be uniform
            for key in start..start + q.length {
                assert_eq!(model.get(&key), model.get(&start));
            }
        }
    }
}
