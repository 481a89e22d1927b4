use std::collections::BTreeMap;

use super::sector_interval::SectorInterval;

/// A canonical, ascending, non-overlapping and non-abutting collection of
/// [`SectorInterval`]s, backed by a `lower -> upper` map.
///
/// `boost::icl::interval_set` (the structure the reference implementation
/// uses) and the `rangemap` crate both offer this shape, but neither gives
/// an unconditional guarantee of abutting-range fusion for integer half-open
/// ranges across versions, and the property tests in this module require
/// exact abut-fusion on every insert, so the map is rolled by hand here.
/// See DESIGN.md.
#[derive(Debug, Default, Clone)]
pub struct SectorSet {
    intervals: BTreeMap<u64, u64>,
    unsynced: u64,
}

impl SectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union-merge `iv` into the set, fusing overlapping or abutting
    /// neighbors. No-op for an empty interval.
    pub fn add_interval(&mut self, iv: SectorInterval) {
        if iv.is_empty() {
            return;
        }

        let mut lower = iv.lower();
        let mut upper = iv.upper();

        // Find every existing interval that overlaps or abuts [lower, upper)
        // and fold it into the new bounds, removing it from the map.
        //
        // Start from the entry whose lower bound is <= upper (the
        // predecessor could still abut us), walk forward while entries
        // continue to overlap or abut.
        let mut absorbed = Vec::new();
        for (&l, &u) in self.intervals.range(..=upper) {
            if u < lower {
                continue;
            }
            absorbed.push(l);
            lower = lower.min(l);
            upper = upper.max(u);
        }
        for l in &absorbed {
            let removed_upper = self.intervals.remove(l).expect("just matched");
            self.unsynced -= removed_upper - l;
        }

        self.intervals.insert(lower, upper);
        self.unsynced += upper - lower;
    }

    /// Identical semantics to [`Self::add_interval`]; the distinction is
    /// carried through the API for a future persistence layer
    /// and has no behavior difference here.
    pub fn add_nonvolatile_interval(&mut self, iv: SectorInterval) {
        self.add_interval(iv);
    }

    /// Subtract `iv` from the set, splitting or trimming overlapping
    /// intervals. No-op for an empty interval or one with no overlap.
    pub fn remove_interval(&mut self, iv: SectorInterval) {
        if iv.is_empty() {
            return;
        }
        let lower = iv.lower();
        let upper = iv.upper();

        let mut overlapping = Vec::new();
        for (&l, &u) in self.intervals.range(..upper) {
            if u > lower {
                overlapping.push((l, u));
            }
        }

        for (l, u) in overlapping {
            self.intervals.remove(&l).expect("just matched");
            self.unsynced -= u - l;

            if l < lower {
                self.intervals.insert(l, lower);
                self.unsynced += lower - l;
            }
            if u > upper {
                self.intervals.insert(upper, u);
                self.unsynced += u - upper;
            }
        }
    }

    /// Empty the set.
    pub fn clear_intervals(&mut self) {
        self.intervals.clear();
        self.unsynced = 0;
    }

    /// The first (lowest) non-empty interval, or an empty interval if the
    /// set has nothing unsynced. Never blocks.
    pub fn get_continuous_unsynced(&self) -> SectorInterval {
        match self.intervals.iter().next() {
            Some((&l, &u)) => SectorInterval::new(l, u),
            None => SectorInterval::empty(),
        }
    }

    /// Total cardinality across all intervals. O(1).
    pub fn unsynced_sector_count(&self) -> u64 {
        self.unsynced
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Iterate intervals in ascending order, for diagnostics and tests.
    pub fn iter(&self) -> impl Iterator<Item = SectorInterval> + '_ {
        self.intervals.iter().map(|(&l, &u)| SectorInterval::new(l, u))
    }

    /// Internal consistency check used by property tests: no two intervals
    /// overlap or abut, ascending order, and the count matches the sum of
    /// cardinalities.
    #[cfg(test)]
    fn is_canonical(&self) -> bool {
        let mut prev_upper: Option<u64> = None;
        let mut sum = 0u64;
        for (&l, &u) in &self.intervals {
            if u <= l {
                return false;
            }
            if let Some(p) = prev_upper {
                if l <= p {
                    return false;
                }
            }
            prev_upper = Some(u);
            sum += u - l;
        }
        sum == self.unsynced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn iv(l: u64, u: u64) -> SectorInterval {
        SectorInterval::new(l, u)
    }

    #[test]
    fn add_fuses_abutting_intervals() {
        let mut s = SectorSet::new();
        s.add_interval(iv(0, 8));
        s.add_interval(iv(8, 16));
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![iv(0, 16)]);
        assert_eq!(s.unsynced_sector_count(), 16);
    }

    #[test]
    fn add_fuses_overlapping_intervals() {
        let mut s = SectorSet::new();
        s.add_interval(iv(0, 10));
        s.add_interval(iv(5, 20));
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![iv(0, 20)]);
        assert_eq!(s.unsynced_sector_count(), 20);
    }

    #[test]
    fn add_bridges_a_gap_when_spanned() {
        let mut s = SectorSet::new();
        s.add_interval(iv(0, 8));
        s.add_interval(iv(16, 24));
        s.add_interval(iv(8, 16));
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![iv(0, 24)]);
    }

    #[test]
    fn disjoint_intervals_stay_separate_and_ascending() {
        let mut s = SectorSet::new();
        s.add_interval(iv(16, 24));
        s.add_interval(iv(0, 8));
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![iv(0, 8), iv(16, 24)]);
    }

    #[test]
    fn remove_splits_an_interval() {
        let mut s = SectorSet::new();
        s.add_interval(iv(0, 40));
        s.remove_interval(iv(8, 16));
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![iv(0, 8), iv(16, 40)]);
        assert_eq!(s.unsynced_sector_count(), 32);
    }

    #[test]
    fn remove_trims_from_either_end() {
        let mut s = SectorSet::new();
        s.add_interval(iv(0, 40));
        s.remove_interval(iv(0, 8));
        s.remove_interval(iv(32, 40));
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![iv(8, 32)]);
    }

    #[test]
    fn add_then_remove_disjoint_interval_round_trips() {
        // The round-trip property holds for an interval that
        // was not already (partially) present: add-then-remove of a range
        // that overlaps existing coverage is not invertible in general,
        // since remove always carves the full requested range regardless
        // of which part of it pre-existed.
        let mut s = SectorSet::new();
        s.add_interval(iv(100, 1000));
        s.add_interval(iv(16, 32));
        let snapshot: Vec<_> = s.iter().collect();

        s.add_interval(iv(5000, 5100));
        s.remove_interval(iv(5000, 5100));

        assert_eq!(s.iter().collect::<Vec<_>>(), snapshot);
    }

    #[test]
    fn empty_interval_ops_are_no_ops() {
        let mut s = SectorSet::new();
        s.add_interval(iv(10, 20));
        s.add_interval(SectorInterval::empty());
        s.remove_interval(SectorInterval::empty());
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![iv(10, 20)]);
    }

    #[test]
    fn get_continuous_unsynced_on_empty_set() {
        let s = SectorSet::new();
        assert!(s.get_continuous_unsynced().is_empty());
    }

    #[test]
    fn add_is_commutative() {
        let mut a = SectorSet::new();
        a.add_interval(iv(0, 8));
        a.add_interval(iv(20, 30));
        a.add_interval(iv(8, 20));

        let mut b = SectorSet::new();
        b.add_interval(iv(8, 20));
        b.add_interval(iv(20, 30));
        b.add_interval(iv(0, 8));

        assert_eq!(a.iter().collect::<Vec<_>>(), b.iter().collect::<Vec<_>>());
        assert_eq!(a.unsynced_sector_count(), b.unsynced_sector_count());
    }

    proptest! {
        #[test]
        fn arbitrary_add_remove_sequences_stay_canonical(
            ops in prop::collection::vec(
                (any::<bool>(), 0u64..200, 0u64..40),
                0..200,
            )
        ) {
            let mut s = SectorSet::new();
            for (is_add, lower, len) in ops {
                let interval = iv(lower, lower + len);
                if is_add {
                    s.add_interval(interval);
                } else {
                    s.remove_interval(interval);
                }
                prop_assert!(s.is_canonical());
            }
        }

        #[test]
        fn add_remove_round_trip_restores_set(
            base in prop::collection::vec((0u64..200, 1u64..40), 0..20),
            extra_len in 1u64..40,
        ) {
            let mut s = SectorSet::new();
            for (lower, len) in &base {
                s.add_interval(iv(*lower, lower + len));
            }
            let before: Vec<_> = s.iter().collect();
            let count_before = s.unsynced_sector_count();

            // Pick a range guaranteed disjoint from everything added above
            // (base intervals live in [0, 240)) so add-then-remove is
            // invertible; see the unit test above for why overlap breaks it.
            let extra_lower = 10_000u64;
            let extra = iv(extra_lower, extra_lower + extra_len);
            s.add_interval(extra);
            s.remove_interval(extra);

            prop_assert_eq!(s.iter().collect::<Vec<_>>(), before);
            prop_assert_eq!(s.unsynced_sector_count(), count_before);
        }
    }
}
