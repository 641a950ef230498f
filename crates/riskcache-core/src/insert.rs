//! Conflict-free insertion of newly discovered ranges.
//!
//! A candidate range reported by the registry may already have known ranges
//! inside it (children) or may itself lie inside a known range. Either way the
//! index must stay disjoint without losing any address:
//!
//! - children keep their records and the candidate is stored as
//!   `candidate minus children`;
//! - a known parent with a different score is carved: it is replaced by
//!   `parent minus candidate` under its old record, and the candidate is
//!   stored under the new one.
//!
//! Ranges carrying the same score as the new record add no information and
//! are not split around.

use crate::error::IndexError;
use crate::index::RangeIndex;
use crate::split;
use crate::types::{NetworkRange, RiskRecord};
use crate::verify::Family;

/// Treatment of stored children whose score equals the new record's.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum RedundantChildPolicy {
    /// Drop them from the index; the candidate is stored whole and answers
    /// for their addresses with the same score.
    #[default]
    Absorb,
    /// Treat them like any other child and split the candidate around them.
    Keep,
}

/// What an insertion did to the index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Candidate stored whole, replacing `absorbed` same-score children.
    Inserted { absorbed: usize },
    /// Candidate stored as `parts` sub-ranges around `children`.
    Subdivided { parts: usize, children: usize, absorbed: usize },
    /// A stored parent was split around the candidate.
    Carved { parent: NetworkRange },
    /// The exact range is already stored. Nothing changed.
    AlreadyKnown,
    /// A stored parent already carries the same score. Nothing changed.
    Redundant { parent: NetworkRange },
}

impl InsertOutcome {
    /// Whether the index was modified.
    pub fn changed(&self) -> bool {
        !matches!(self, Self::AlreadyKnown | Self::Redundant { .. })
    }
}

/// Result of [`RangeIndex::insert_split`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Insertion {
    pub outcome: InsertOutcome,
    /// Subdivision record for auditing; `None` when nothing was split or
    /// absorbed.
    pub family: Option<Family>,
}

impl Insertion {
    fn unsplit(outcome: InsertOutcome) -> Self {
        Self { outcome, family: None }
    }
}

impl RangeIndex<RiskRecord> {
    /// Insert `candidate -> record` keeping the index disjoint.
    ///
    /// All-or-nothing: the complete set of removals and additions is
    /// validated before any entry changes.
    pub fn insert_split(
        &mut self,
        candidate: NetworkRange,
        record: RiskRecord,
        policy: RedundantChildPolicy,
    ) -> Result<Insertion, IndexError> {
        if let Some((existing, stored)) = self.containing(&candidate) {
            let parent = *existing;
            if parent == candidate {
                return Ok(Insertion::unsplit(InsertOutcome::AlreadyKnown));
            }
            if stored.same_score(&record) {
                return Ok(Insertion::unsplit(InsertOutcome::Redundant { parent }));
            }

            let parent_record = stored.clone();
            let parts = split::exclude(parent, candidate);
            let mut additions: Vec<(NetworkRange, RiskRecord)> =
                parts.iter().map(|p| (*p, parent_record.clone())).collect();
            additions.push((candidate, record));
            self.replace(&[parent], additions)?;

            return Ok(Insertion {
                outcome: InsertOutcome::Carved { parent },
                family: Some(Family {
                    parent,
                    children: vec![candidate],
                    parts,
                    absorbed: Vec::new(),
                }),
            });
        }

        let mut children = Vec::new();
        let mut absorbed = Vec::new();
        for (range, stored) in self.children_of(&candidate) {
            if policy == RedundantChildPolicy::Absorb && stored.same_score(&record) {
                absorbed.push(*range);
            } else {
                children.push(*range);
            }
        }

        let parts = split::subtract(candidate, &children);
        let additions = parts.iter().map(|p| (*p, record.clone())).collect();
        self.replace(&absorbed, additions)?;

        if children.is_empty() {
            let outcome = InsertOutcome::Inserted { absorbed: absorbed.len() };
            if absorbed.is_empty() {
                return Ok(Insertion::unsplit(outcome));
            }
            // Absorbed records leave the index, so only the family keeps them visible.
            return Ok(Insertion {
                outcome,
                family: Some(Family { parent: candidate, children, parts, absorbed }),
            });
        }
        Ok(Insertion {
            outcome: InsertOutcome::Subdivided {
                parts: parts.len(),
                children: children.len(),
                absorbed: absorbed.len(),
            },
            family: Some(Family { parent: candidate, children, parts, absorbed }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::verify_family;
    use std::net::IpAddr;

    fn r(s: &str) -> NetworkRange {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn rec(score: f64, label: &str) -> RiskRecord {
        RiskRecord::scored(score, label)
    }

    fn score_at(index: &RangeIndex<RiskRecord>, addr: &str) -> Option<f64> {
        index.find(ip(addr)).map(|(_, v)| v.score)
    }

    #[test]
    fn insert_into_empty_index() {
        let mut index: RangeIndex<RiskRecord> = RangeIndex::new();
        let ins = index
            .insert_split(r("10.0.0.0/24"), rec(10.0, "A"), RedundantChildPolicy::Absorb)
            .unwrap();
        assert_eq!(ins.outcome, InsertOutcome::Inserted { absorbed: 0 });
        assert!(ins.family.is_none());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn narrower_range_carves_stored_parent() {
        let mut index: RangeIndex<RiskRecord> = RangeIndex::new();
        index.insert_split(r("10.0.0.0/24"), rec(10.0, "A"), RedundantChildPolicy::Absorb).unwrap();
        let ins = index
            .insert_split(r("10.0.0.0/25"), rec(90.0, "B"), RedundantChildPolicy::Absorb)
            .unwrap();

        assert_eq!(ins.outcome, InsertOutcome::Carved { parent: r("10.0.0.0/24") });
        assert_eq!(index.find(ip("10.0.0.10")).unwrap().1.category, "B");
        assert_eq!(index.find(ip("10.0.0.200")).unwrap().1.category, "A");
        let ranges: Vec<_> = index.ranges().copied().collect();
        assert_eq!(ranges, vec![r("10.0.0.0/25"), r("10.0.0.128/25")]);
        assert!(verify_family(&ins.family.unwrap()).is_ok());
    }

    #[test]
    fn wider_range_splits_around_child() {
        let mut index: RangeIndex<RiskRecord> = RangeIndex::new();
        index.insert_split(r("10.0.0.0/25"), rec(90.0, "B"), RedundantChildPolicy::Absorb).unwrap();
        let ins = index
            .insert_split(r("10.0.0.0/24"), rec(10.0, "A"), RedundantChildPolicy::Absorb)
            .unwrap();

        assert_eq!(ins.outcome, InsertOutcome::Subdivided { parts: 1, children: 1, absorbed: 0 });
        let ranges: Vec<_> = index.ranges().copied().collect();
        assert_eq!(ranges, vec![r("10.0.0.0/25"), r("10.0.0.128/25")]);
        assert_eq!(score_at(&index, "10.0.0.10"), Some(90.0));
        assert_eq!(score_at(&index, "10.0.0.200"), Some(10.0));

        let family = ins.family.unwrap();
        assert_eq!(family.parent, r("10.0.0.0/24"));
        assert_eq!(family.children, vec![r("10.0.0.0/25")]);
        assert_eq!(family.parts, vec![r("10.0.0.128/25")]);
        assert!(verify_family(&family).is_ok());
    }

    #[test]
    fn both_orders_converge() {
        let mut forward: RangeIndex<RiskRecord> = RangeIndex::new();
        forward.insert_split(r("10.0.0.0/24"), rec(10.0, "A"), RedundantChildPolicy::Absorb).unwrap();
        forward.insert_split(r("10.0.0.0/25"), rec(90.0, "B"), RedundantChildPolicy::Absorb).unwrap();

        let mut reverse: RangeIndex<RiskRecord> = RangeIndex::new();
        reverse.insert_split(r("10.0.0.0/25"), rec(90.0, "B"), RedundantChildPolicy::Absorb).unwrap();
        reverse.insert_split(r("10.0.0.0/24"), rec(10.0, "A"), RedundantChildPolicy::Absorb).unwrap();

        assert_eq!(forward, reverse);
    }

    #[test]
    fn children_keep_their_records() {
        let mut index: RangeIndex<RiskRecord> = RangeIndex::new();
        index.insert_split(r("10.0.0.64/26"), rec(50.0, "C1"), RedundantChildPolicy::Absorb).unwrap();
        index.insert_split(r("10.0.0.200/30"), rec(70.0, "C2"), RedundantChildPolicy::Absorb).unwrap();
        let ins = index
            .insert_split(r("10.0.0.0/24"), rec(5.0, "P"), RedundantChildPolicy::Absorb)
            .unwrap();

        assert_eq!(index.find(ip("10.0.0.65")).unwrap().1.category, "C1");
        assert_eq!(index.find(ip("10.0.0.201")).unwrap().1.category, "C2");
        assert_eq!(index.find(ip("10.0.0.1")).unwrap().1.category, "P");
        assert_eq!(index.find(ip("10.0.0.255")).unwrap().1.category, "P");
        assert!(index.verify().is_ok());
        assert!(verify_family(&ins.family.unwrap()).is_ok());
    }

    #[test]
    fn same_score_child_is_absorbed() {
        let mut index: RangeIndex<RiskRecord> = RangeIndex::new();
        index.insert_split(r("10.0.0.0/26"), rec(30.0, "old"), RedundantChildPolicy::Absorb).unwrap();
        let ins = index
            .insert_split(r("10.0.0.0/24"), rec(30.0, "new"), RedundantChildPolicy::Absorb)
            .unwrap();

        assert_eq!(ins.outcome, InsertOutcome::Inserted { absorbed: 1 });
        let ranges: Vec<_> = index.ranges().copied().collect();
        assert_eq!(ranges, vec![r("10.0.0.0/24")]);
        assert_eq!(score_at(&index, "10.0.0.1"), Some(30.0));

        let family = ins.family.unwrap();
        assert_eq!(family.parent, r("10.0.0.0/24"));
        assert!(family.children.is_empty());
        assert_eq!(family.parts, vec![r("10.0.0.0/24")]);
        assert_eq!(family.absorbed, vec![r("10.0.0.0/26")]);
        assert!(verify_family(&family).is_ok());
    }

    #[test]
    fn keep_policy_splits_around_same_score_child() {
        let mut index: RangeIndex<RiskRecord> = RangeIndex::new();
        index.insert_split(r("10.0.0.0/26"), rec(30.0, "old"), RedundantChildPolicy::Keep).unwrap();
        let ins = index
            .insert_split(r("10.0.0.0/24"), rec(30.0, "new"), RedundantChildPolicy::Keep)
            .unwrap();

        assert!(matches!(ins.outcome, InsertOutcome::Subdivided { children: 1, .. }));
        assert_eq!(index.find(ip("10.0.0.1")).unwrap().1.category, "old");
        assert_eq!(index.find(ip("10.0.0.100")).unwrap().1.category, "new");
    }

    #[test]
    fn mixed_children_record_family_with_absorbed() {
        let mut index: RangeIndex<RiskRecord> = RangeIndex::new();
        index.insert_split(r("10.0.0.0/26"), rec(30.0, "same"), RedundantChildPolicy::Absorb).unwrap();
        index.insert_split(r("10.0.0.128/26"), rec(99.0, "diff"), RedundantChildPolicy::Absorb).unwrap();
        let ins = index
            .insert_split(r("10.0.0.0/24"), rec(30.0, "P"), RedundantChildPolicy::Absorb)
            .unwrap();

        let family = ins.family.unwrap();
        assert_eq!(family.children, vec![r("10.0.0.128/26")]);
        assert_eq!(family.absorbed, vec![r("10.0.0.0/26")]);
        assert_eq!(family.parts, vec![r("10.0.0.0/25"), r("10.0.0.192/26")]);
        assert!(verify_family(&family).is_ok());
        assert_eq!(index.find(ip("10.0.0.1")).unwrap().1.category, "P");
        assert_eq!(index.find(ip("10.0.0.130")).unwrap().1.category, "diff");
    }

    #[test]
    fn exact_duplicate_is_already_known() {
        let mut index: RangeIndex<RiskRecord> = RangeIndex::new();
        index.insert_split(r("10.0.0.0/24"), rec(1.0, "A"), RedundantChildPolicy::Absorb).unwrap();
        let ins = index
            .insert_split(r("10.0.0.0/24"), rec(2.0, "B"), RedundantChildPolicy::Absorb)
            .unwrap();
        assert_eq!(ins.outcome, InsertOutcome::AlreadyKnown);
        assert!(!ins.outcome.changed());
        assert_eq!(index.find(ip("10.0.0.1")).unwrap().1.category, "A");
    }

    #[test]
    fn same_score_parent_makes_candidate_redundant() {
        let mut index: RangeIndex<RiskRecord> = RangeIndex::new();
        index.insert_split(r("10.0.0.0/16"), rec(1.0, "A"), RedundantChildPolicy::Absorb).unwrap();
        let ins = index
            .insert_split(r("10.0.4.0/24"), rec(1.0, "B"), RedundantChildPolicy::Absorb)
            .unwrap();
        assert_eq!(ins.outcome, InsertOutcome::Redundant { parent: r("10.0.0.0/16") });
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn disjoint_candidates_accumulate() {
        let mut index: RangeIndex<RiskRecord> = RangeIndex::new();
        for (i, cidr) in ["10.0.0.0/24", "10.0.1.0/24", "2001:db8::/48"].iter().enumerate() {
            index
                .insert_split(r(cidr), rec(i as f64, "x"), RedundantChildPolicy::Absorb)
                .unwrap();
        }
        assert_eq!(index.len(), 3);
        assert!(index.verify().is_ok());
    }
}
