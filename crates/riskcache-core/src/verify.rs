//! Verification tooling for range sets and split families.
//!
//! None of this is needed for lookups; it backs the maintenance checks that
//! confirm subdivision never drops or duplicates an address.

use serde::{Deserialize, Serialize};

use crate::error::VerifyError;
use crate::types::NetworkRange;

/// How two ranges relate. CIDR blocks either nest or are disjoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Relation {
    Disjoint,
    Equal,
    /// The first range strictly contains the second.
    Contains,
    /// The first range lies strictly inside the second.
    ContainedBy,
}

/// Classify the relation of `a` to `b`.
pub fn classify(a: &NetworkRange, b: &NetworkRange) -> Relation {
    if a == b {
        Relation::Equal
    } else if a.contains_range(b) {
        Relation::Contains
    } else if b.contains_range(a) {
        Relation::ContainedBy
    } else {
        Relation::Disjoint
    }
}

/// A subdivided range: its pre-existing children and the parts that were
/// stored in its place.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Family {
    pub parent: NetworkRange,
    /// Stored ranges inside `parent` that kept their own records.
    pub children: Vec<NetworkRange>,
    /// Ranges inserted with the parent's record.
    pub parts: Vec<NetworkRange>,
    /// Same-score ranges inside `parent` whose addresses `parts` took over.
    #[serde(default)]
    pub absorbed: Vec<NetworkRange>,
}

/// Confirm `ranges` is ascending and pairwise disjoint.
///
/// Single pass; checking neighbours suffices because CIDR blocks sorted by
/// first address can only overlap an adjacent block if any overlap exists.
pub fn verify_disjoint<'a>(
    ranges: impl IntoIterator<Item = &'a NetworkRange>,
) -> Result<(), VerifyError> {
    let mut prev: Option<&NetworkRange> = None;
    for range in ranges {
        if let Some(p) = prev {
            if range < p {
                return Err(VerifyError::Unordered { prev: *p, next: *range });
            }
            if range.first() <= p.last() {
                return Err(VerifyError::Overlap { a: *p, b: *range });
            }
        }
        prev = Some(range);
    }
    Ok(())
}

/// Confirm `children ∪ parts` tile the parent: disjoint, gap-free, and
/// covering exactly its first through last address.
pub fn verify_family(family: &Family) -> Result<(), VerifyError> {
    let parent = family.parent;
    let mut members: Vec<NetworkRange> = family
        .children
        .iter()
        .chain(family.parts.iter())
        .copied()
        .collect();
    if members.is_empty() {
        return Err(VerifyError::Empty(parent));
    }
    members.sort();

    for member in &members {
        if !parent.contains_range(member) {
            return Err(VerifyError::OutsideParent { range: *member, parent });
        }
    }
    verify_disjoint(members.iter())?;

    let (p_first, p_last) = parent.bounds();
    if members[0].bounds().0 != p_first {
        return Err(VerifyError::StartUncovered(parent));
    }
    for pair in members.windows(2) {
        // Disjoint and sorted, so `last + 1` cannot overflow here.
        if pair[0].bounds().1 + 1 != pair[1].bounds().0 {
            return Err(VerifyError::Gap { after: pair[0], next: pair[1] });
        }
    }
    if members[members.len() - 1].bounds().1 != p_last {
        return Err(VerifyError::EndUncovered(parent));
    }
    Ok(())
}

/// Every overlapping pair in an arbitrary range sequence, with its relation.
///
/// Used on raw store contents that never went through an index.
pub fn audit_overlaps(ranges: &[NetworkRange]) -> Vec<(NetworkRange, NetworkRange, Relation)> {
    let mut sorted = ranges.to_vec();
    sorted.sort();
    let mut found = Vec::new();
    for (i, a) in sorted.iter().enumerate() {
        for b in &sorted[i + 1..] {
            if b.first() > a.last() {
                break;
            }
            found.push((*a, *b, classify(a, b)));
        }
    }
    found
}

/// Serialize families as a pretty-printed JSON array.
pub fn families_to_json<'a>(
    families: impl IntoIterator<Item = &'a Family>,
) -> Result<String, serde_json::Error> {
    let list: Vec<&Family> = families.into_iter().collect();
    serde_json::to_string_pretty(&list)
}

pub fn families_from_json(json: &str) -> Result<Vec<Family>, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: &str) -> NetworkRange {
        s.parse().unwrap()
    }

    #[test]
    fn classify_all_relations() {
        assert_eq!(classify(&r("10.0.0.0/24"), &r("10.0.0.0/24")), Relation::Equal);
        assert_eq!(classify(&r("10.0.0.0/24"), &r("10.0.0.0/25")), Relation::Contains);
        assert_eq!(classify(&r("10.0.0.128/25"), &r("10.0.0.0/24")), Relation::ContainedBy);
        assert_eq!(classify(&r("10.0.0.0/25"), &r("10.0.0.128/25")), Relation::Disjoint);
    }

    #[test]
    fn disjoint_sequence_passes() {
        let ranges = [r("10.0.0.0/25"), r("10.0.0.128/25"), r("10.0.1.0/24")];
        assert!(verify_disjoint(ranges.iter()).is_ok());
    }

    #[test]
    fn overlap_is_reported() {
        let ranges = [r("10.0.0.0/24"), r("10.0.0.128/25")];
        assert_eq!(
            verify_disjoint(ranges.iter()),
            Err(VerifyError::Overlap { a: r("10.0.0.0/24"), b: r("10.0.0.128/25") })
        );
    }

    #[test]
    fn unordered_is_reported() {
        let ranges = [r("10.0.1.0/24"), r("10.0.0.0/24")];
        assert!(matches!(
            verify_disjoint(ranges.iter()),
            Err(VerifyError::Unordered { .. })
        ));
    }

    #[test]
    fn complete_family_verifies() {
        let family = Family {
            parent: r("10.0.0.0/24"),
            children: vec![r("10.0.0.64/26")],
            parts: vec![r("10.0.0.0/26"), r("10.0.0.128/25")],
            absorbed: vec![],
        };
        assert!(verify_family(&family).is_ok());
    }

    #[test]
    fn family_gap_detected() {
        let family = Family {
            parent: r("10.0.0.0/24"),
            children: vec![r("10.0.0.64/26")],
            parts: vec![r("10.0.0.128/25")],
            absorbed: vec![],
        };
        assert_eq!(verify_family(&family), Err(VerifyError::StartUncovered(r("10.0.0.0/24"))));

        let family = Family {
            parent: r("10.0.0.0/24"),
            children: vec![r("10.0.0.0/26")],
            parts: vec![r("10.0.0.128/25")],
            absorbed: vec![],
        };
        assert!(matches!(verify_family(&family), Err(VerifyError::Gap { .. })));
    }

    #[test]
    fn family_member_outside_parent() {
        let family = Family {
            parent: r("10.0.0.0/25"),
            children: vec![r("10.0.0.0/26")],
            parts: vec![r("10.0.0.64/26"), r("10.0.0.128/26")],
            absorbed: vec![],
        };
        assert!(matches!(verify_family(&family), Err(VerifyError::OutsideParent { .. })));
    }

    #[test]
    fn empty_family_rejected() {
        let family = Family { parent: r("10.0.0.0/24"), children: vec![], parts: vec![], absorbed: vec![] };
        assert_eq!(verify_family(&family), Err(VerifyError::Empty(r("10.0.0.0/24"))));
    }

    #[test]
    fn audit_lists_nested_pairs() {
        let raw = [r("10.0.0.0/16"), r("192.0.2.0/24"), r("10.0.5.0/24"), r("10.0.5.0/24")];
        let found = audit_overlaps(&raw);
        assert_eq!(found.len(), 3);
        assert!(found.contains(&(r("10.0.0.0/16"), r("10.0.5.0/24"), Relation::Contains)));
        assert!(found.contains(&(r("10.0.5.0/24"), r("10.0.5.0/24"), Relation::Equal)));
    }

    #[test]
    fn families_json_round_trip() {
        let family = Family {
            parent: r("10.0.0.0/24"),
            children: vec![r("10.0.0.0/25")],
            parts: vec![r("10.0.0.128/25")],
            absorbed: vec![],
        };
        let json = families_to_json([&family]).unwrap();
        assert!(json.contains("\"10.0.0.0/24\""));
        assert_eq!(families_from_json(&json).unwrap(), vec![family]);
    }
}
