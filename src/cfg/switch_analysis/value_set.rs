//! Interval sets over `i64`
//!
//! Tracks which discriminant values can reach each block of a dispatch tree.

use std::fmt;

/// Sorted, disjoint, non-adjacent closed intervals
#[derive(Clone, PartialEq, Eq, Default)]
pub struct LongSet {
    ranges: Vec<(i64, i64)>,
}

impl LongSet {
    pub fn empty() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn full() -> Self {
        Self {
            ranges: vec![(i64::MIN, i64::MAX)],
        }
    }

    pub fn point(value: i64) -> Self {
        Self {
            ranges: vec![(value, value)],
        }
    }

    /// `[lo, hi]`; empty when `lo > hi`
    pub fn range(lo: i64, hi: i64) -> Self {
        if lo > hi {
            Self::empty()
        } else {
            Self {
                ranges: vec![(lo, hi)],
            }
        }
    }

    pub fn below(value: i64) -> Self {
        match value.checked_sub(1) {
            Some(hi) => Self::range(i64::MIN, hi),
            None => Self::empty(),
        }
    }

    pub fn above(value: i64) -> Self {
        match value.checked_add(1) {
            Some(lo) => Self::range(lo, i64::MAX),
            None => Self::empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ranges == [(i64::MIN, i64::MAX)]
    }

    pub fn contains(&self, value: i64) -> bool {
        self.ranges
            .iter()
            .any(|&(lo, hi)| lo <= value && value <= hi)
    }

    /// Number of values
    pub fn len(&self) -> u128 {
        self.ranges
            .iter()
            .map(|&(lo, hi)| (hi as i128 - lo as i128 + 1) as u128)
            .sum()
    }

    pub fn intervals(&self) -> &[(i64, i64)] {
        &self.ranges
    }

    /// Every value; only call on small sets
    pub fn values(&self) -> impl Iterator<Item = i64> + '_ {
        self.ranges.iter().flat_map(|&(lo, hi)| lo..=hi)
    }

    pub fn complement(&self) -> Self {
        let mut ranges = Vec::with_capacity(self.ranges.len() + 1);
        let mut next = Some(i64::MIN);
        for &(lo, hi) in &self.ranges {
            if let Some(start) = next {
                if start < lo {
                    ranges.push((start, lo - 1));
                }
            }
            next = hi.checked_add(1);
        }
        if let Some(start) = next {
            ranges.push((start, i64::MAX));
        }
        Self { ranges }
    }

    pub fn intersect(&self, other: &LongSet) -> Self {
        let mut ranges = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a_lo, a_hi) = self.ranges[i];
            let (b_lo, b_hi) = other.ranges[j];
            let lo = a_lo.max(b_lo);
            let hi = a_hi.min(b_hi);
            if lo <= hi {
                ranges.push((lo, hi));
            }
            if a_hi < b_hi {
                i += 1;
            } else {
                j += 1;
            }
        }
        Self { ranges }
    }

    pub fn union(&self, other: &LongSet) -> Self {
        let mut all: Vec<(i64, i64)> = self
            .ranges
            .iter()
            .chain(other.ranges.iter())
            .copied()
            .collect();
        all.sort_unstable();
        let mut ranges: Vec<(i64, i64)> = Vec::with_capacity(all.len());
        for (lo, hi) in all {
            match ranges.last_mut() {
                Some(last) if last.1 == i64::MAX || lo <= last.1 + 1 => last.1 = last.1.max(hi),
                _ => ranges.push((lo, hi)),
            }
        }
        Self { ranges }
    }
}

impl fmt::Debug for LongSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (lo, hi)) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if lo == hi {
                write!(f, "{}", lo)?;
            } else {
                write!(f, "[{}..{}]", lo, hi)?;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complement_of_point_splits_domain() {
        let set = LongSet::point(5).complement();
        assert_eq!(set.intervals(), &[(i64::MIN, 4), (6, i64::MAX)]);
        assert!(!set.contains(5));
        assert_eq!(set.complement(), LongSet::point(5));
    }

    #[test]
    fn union_merges_adjacent_ranges() {
        let set = LongSet::range(1, 3).union(&LongSet::range(4, 6)).union(&LongSet::point(9));
        assert_eq!(set.intervals(), &[(1, 6), (9, 9)]);
        assert_eq!(set.len(), 7);
        assert_eq!(set.values().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6, 9]);
    }

    #[test]
    fn intersection_of_disjoint_sets_is_empty() {
        let a = LongSet::below(0);
        let b = LongSet::above(-1);
        assert!(a.intersect(&b).is_empty());
        assert!(a.union(&b).is_full());
    }

    #[test]
    fn extreme_bounds_do_not_overflow() {
        assert!(LongSet::below(i64::MIN).is_empty());
        assert!(LongSet::above(i64::MAX).is_empty());
        assert_eq!(LongSet::full().len(), 1u128 << 64);
        assert!(LongSet::full().complement().is_empty());
    }
}
