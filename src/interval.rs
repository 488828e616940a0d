// Sorted offset -> value map with predecessor and range-decomposition queries.
//
// Every layer of offset resolution reuses this structure: container offset ->
// entry name, compressed offset -> uncompressed offset, uncompressed offset ->
// archive path. The entry at key `k_i` owns the half-open interval
// `[k_i, k_{i+1})`; the last entry's interval extends to infinity.
//
// Maps are built once in byte order and read many times, so a sorted vector
// with binary search replaces the persistent balanced tree a functional
// implementation would reach for. Insertion enforces strictly increasing
// keys; traversal order therefore always matches byte order.

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct IntervalMap<V> {
    entries: Vec<(u64, V)>,
}

/// One clipped interval produced by `range()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clipped<'a, V> {
    pub value: &'a V,
    pub from: u64,
    pub to: u64,
}

impl<V> IntervalMap<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            entries: Vec::with_capacity(cap),
        }
    }

    /// Build from entries already in strictly increasing key order.
    pub(crate) fn from_sorted(entries: Vec<(u64, V)>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        Self { entries }
    }

    /// Append an interval starting at `key`.
    ///
    /// Fails unless `key` is strictly greater than the last inserted key.
    pub fn insert(&mut self, key: u64, value: V) -> Result<()> {
        if let Some(&(last, _)) = self.entries.last()
            && key <= last
        {
            return Err(Error::NonMonotonicKey { key, last });
        }
        self.entries.push((key, value));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &V)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Entry with the greatest key `<= x`, or `None` if `x` precedes every key.
    pub fn floor(&self, x: u64) -> Option<(u64, &V)> {
        let idx = self.entries.partition_point(|(k, _)| *k <= x);
        if idx == 0 {
            return None;
        }
        let (k, v) = &self.entries[idx - 1];
        Some((*k, v))
    }

    /// Decompose `[from, to)` into the intervals it overlaps.
    ///
    /// Emitted clips are non-decreasing and tile the intersection of
    /// `[from, to)` with the map's covered domain. The portion of the query
    /// preceding the first key (if any) is silently dropped; zero-length
    /// clips are skipped.
    pub fn range(&self, from: u64, to: u64) -> Vec<Clipped<'_, V>> {
        let mut out = Vec::new();
        if from >= to || self.entries.is_empty() {
            return out;
        }

        // First interval that can overlap: floor(from), or the first entry
        // when `from` precedes all keys.
        let start = self
            .entries
            .partition_point(|(k, _)| *k <= from)
            .saturating_sub(1);

        for (i, (key, value)) in self.entries.iter().enumerate().skip(start) {
            if *key >= to {
                break;
            }
            let end = match self.entries.get(i + 1) {
                Some(&(next, _)) => next.min(to),
                None => to,
            };
            let clip_from = (*key).max(from);
            if clip_from < end {
                out.push(Clipped {
                    value,
                    from: clip_from,
                    to: end,
                });
            }
        }
        out
    }
}

impl<V> Default for IntervalMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn map(keys: &[(u64, &'static str)]) -> IntervalMap<&'static str> {
        let mut m = IntervalMap::new();
        for &(k, v) in keys {
            m.insert(k, v).unwrap();
        }
        m
    }

    #[test]
    fn insert_rejects_non_monotonic_keys() {
        let mut m = IntervalMap::new();
        m.insert(10, "a").unwrap();
        assert!(m.insert(10, "b").is_err());
        assert!(m.insert(5, "c").is_err());
        m.insert(11, "d").unwrap();
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn floor_basics() {
        let m = map(&[(10, "a"), (20, "b"), (30, "c")]);
        assert_eq!(m.floor(9), None);
        assert_eq!(m.floor(10), Some((10, &"a")));
        assert_eq!(m.floor(19), Some((10, &"a")));
        assert_eq!(m.floor(20), Some((20, &"b")));
        assert_eq!(m.floor(1000), Some((30, &"c")));
    }

    #[test]
    fn floor_on_empty_map() {
        let m: IntervalMap<u32> = IntervalMap::new();
        assert_eq!(m.floor(0), None);
    }

    #[test]
    fn range_tiles_interior_query() {
        let m = map(&[(0, "a"), (10, "b"), (20, "c")]);
        let clips = m.range(5, 25);
        let got: Vec<_> = clips.iter().map(|c| (*c.value, c.from, c.to)).collect();
        assert_eq!(got, vec![("a", 5, 10), ("b", 10, 20), ("c", 20, 25)]);
    }

    #[test]
    fn range_single_interval() {
        let m = map(&[(0, "a"), (100, "b")]);
        let clips = m.range(3, 7);
        assert_eq!(clips.len(), 1);
        assert_eq!((*clips[0].value, clips[0].from, clips[0].to), ("a", 3, 7));
    }

    #[test]
    fn range_drops_prefix_before_first_key() {
        let m = map(&[(10, "a"), (20, "b")]);
        let clips = m.range(0, 15);
        let got: Vec<_> = clips.iter().map(|c| (*c.value, c.from, c.to)).collect();
        assert_eq!(got, vec![("a", 10, 15)]);
    }

    #[test]
    fn range_last_interval_extends_to_infinity() {
        let m = map(&[(0, "a")]);
        let clips = m.range(1_000_000, 1_000_004);
        let got: Vec<_> = clips.iter().map(|c| (*c.value, c.from, c.to)).collect();
        assert_eq!(got, vec![("a", 1_000_000, 1_000_004)]);
    }

    #[test]
    fn range_empty_and_inverted_queries() {
        let m = map(&[(0, "a"), (10, "b")]);
        assert!(m.range(5, 5).is_empty());
        assert!(m.range(7, 3).is_empty());
        let empty: IntervalMap<&str> = IntervalMap::new();
        assert!(empty.range(0, 10).is_empty());
    }

    #[test]
    fn range_skips_zero_length_clips() {
        let m = map(&[(0, "a"), (10, "b"), (20, "c")]);
        // Query starting exactly at a boundary must not emit the predecessor.
        let clips = m.range(10, 20);
        let got: Vec<_> = clips.iter().map(|c| (*c.value, c.from, c.to)).collect();
        assert_eq!(got, vec![("b", 10, 20)]);
    }

    #[test]
    fn range_clips_are_contiguous() {
        let m = map(&[(0, "a"), (7, "b"), (13, "c"), (40, "d")]);
        let clips = m.range(2, 60);
        for pair in clips.windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
        }
        assert_eq!(clips.first().unwrap().from, 2);
        assert_eq!(clips.last().unwrap().to, 60);
    }
}
