//! Ordered index of disjoint network ranges.
//!
//! [`RangeIndex`] keeps `(range, value)` pairs in a sorted `Vec` with
//! rank-based access. Because stored ranges never overlap, a point lookup is
//! a plain binary search comparing the target against each midpoint's bounds.
//!
//! Every mutation path checks disjointness before touching the vector, so a
//! rejected insert leaves the index exactly as it was.

use std::collections::HashSet;
use std::net::IpAddr;

use crate::error::{IndexError, VerifyError};
use crate::types::NetworkRange;
use crate::verify;

/// Sorted, disjoint `NetworkRange -> V` mapping.
#[derive(Clone, Debug, PartialEq)]
pub struct RangeIndex<V> {
    entries: Vec<(NetworkRange, V)>,
}

impl<V> Default for RangeIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> RangeIndex<V> {
    /// Create an empty index.
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Build an index from entries in arbitrary order.
    ///
    /// Entries are sorted, then swept in order; an entry overlapping one
    /// already kept is returned in the reject list instead of being stored.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (NetworkRange, V)>,
    ) -> (Self, Vec<(NetworkRange, V)>) {
        let mut sorted: Vec<(NetworkRange, V)> = entries.into_iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut kept: Vec<(NetworkRange, V)> = Vec::with_capacity(sorted.len());
        let mut rejects = Vec::new();
        for (range, value) in sorted {
            match kept.last() {
                Some((prev, _)) if range.first() <= prev.last() => rejects.push((range, value)),
                _ => kept.push((range, value)),
            }
        }
        (Self { entries: kept }, rejects)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at sorted position `rank`.
    pub fn get(&self, rank: usize) -> Option<(&NetworkRange, &V)> {
        self.entries.get(rank).map(|(r, v)| (r, v))
    }

    /// Value stored under exactly `range`.
    pub fn get_exact(&self, range: &NetworkRange) -> Option<&V> {
        self.position(range).ok().map(|i| &self.entries[i].1)
    }

    /// All entries in ascending range order.
    pub fn iter(&self) -> impl Iterator<Item = (&NetworkRange, &V)> {
        self.entries.iter().map(|(r, v)| (r, v))
    }

    /// Stored ranges in ascending order.
    pub fn ranges(&self) -> impl Iterator<Item = &NetworkRange> {
        self.entries.iter().map(|(r, _)| r)
    }

    /// Find the range containing `addr`. O(log n).
    pub fn find(&self, addr: IpAddr) -> Option<(&NetworkRange, &V)> {
        let mut lo = 0usize;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (range, value) = &self.entries[mid];
            if addr < range.first() {
                hi = mid;
            } else if addr > range.last() {
                lo = mid + 1;
            } else {
                return Some((range, value));
            }
        }
        None
    }

    /// Stored range equal to or strictly containing `range`.
    pub fn containing(&self, range: &NetworkRange) -> Option<(&NetworkRange, &V)> {
        self.find(range.first())
            .filter(|(stored, _)| stored.contains_range(range))
    }

    /// Stored ranges that are proper subsets of `range`, ascending.
    pub fn children_of(&self, range: &NetworkRange) -> Vec<(&NetworkRange, &V)> {
        let start = self.entries.partition_point(|(r, _)| r.first() < range.first());
        self.entries[start..]
            .iter()
            .take_while(|(r, _)| r.first() <= range.last())
            .filter(|(r, _)| r.is_proper_subset_of(range))
            .map(|(r, v)| (r, v))
            .collect()
    }

    /// Every stored range sharing at least one address with `range`.
    pub fn overlapping(&self, range: &NetworkRange) -> Vec<NetworkRange> {
        let mut hits: Vec<NetworkRange> = self
            .containing(range)
            .map(|(r, _)| *r)
            .into_iter()
            .collect();
        hits.extend(self.children_of(range).into_iter().map(|(r, _)| *r));
        hits
    }

    /// Insert a range that must not overlap any stored range.
    pub fn insert(&mut self, range: NetworkRange, value: V) -> Result<(), IndexError> {
        if let Some(existing) = self.overlapping(&range).into_iter().next() {
            return Err(IndexError::Overlap { candidate: range, existing });
        }
        self.insert_unchecked(range, value);
        Ok(())
    }

    /// Insert a batch of mutually disjoint ranges, or none of them.
    pub fn insert_all(&mut self, entries: Vec<(NetworkRange, V)>) -> Result<(), IndexError> {
        self.replace(&[], entries)
    }

    /// Remove exactly `range`, returning its value.
    pub fn remove(&mut self, range: &NetworkRange) -> Option<V> {
        self.position(range).ok().map(|i| self.entries.remove(i).1)
    }

    /// Atomically remove `removals` and insert `additions`.
    ///
    /// Fails without changing anything if a removal is not stored, if two
    /// additions overlap, or if an addition overlaps a stored range that is
    /// not being removed.
    pub fn replace(
        &mut self,
        removals: &[NetworkRange],
        additions: Vec<(NetworkRange, V)>,
    ) -> Result<(), IndexError> {
        for range in removals {
            if self.position(range).is_err() {
                return Err(IndexError::NotFound(*range));
            }
        }
        let removed: HashSet<&NetworkRange> = removals.iter().collect();

        let mut pending: Vec<&NetworkRange> = additions.iter().map(|(r, _)| r).collect();
        pending.sort();
        for pair in pending.windows(2) {
            if pair[1].first() <= pair[0].last() {
                return Err(IndexError::Overlap { candidate: *pair[1], existing: *pair[0] });
            }
        }
        for range in &pending {
            if let Some(existing) = self
                .overlapping(range)
                .into_iter()
                .find(|r| !removed.contains(r))
            {
                return Err(IndexError::Overlap { candidate: **range, existing });
            }
        }

        for range in removals {
            self.remove(range);
        }
        for (range, value) in additions {
            self.insert_unchecked(range, value);
        }
        Ok(())
    }

    /// Confirm the stored ranges are sorted and pairwise disjoint.
    pub fn verify(&self) -> Result<(), VerifyError> {
        verify::verify_disjoint(self.ranges())
    }

    fn position(&self, range: &NetworkRange) -> Result<usize, usize> {
        self.entries.binary_search_by(|(r, _)| r.cmp(range))
    }

    fn insert_unchecked(&mut self, range: NetworkRange, value: V) {
        let pos = self.entries.partition_point(|(r, _)| *r < range);
        self.entries.insert(pos, (range, value));
    }
}

impl<V> IntoIterator for RangeIndex<V> {
    type Item = (NetworkRange, V);
    type IntoIter = std::vec::IntoIter<(NetworkRange, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
