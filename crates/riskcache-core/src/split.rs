//! Range subtraction in CIDR terms.
//!
//! [`subtract`] is the heart of conflict-free insertion: a newly discovered
//! range minus the ranges already known inside it, expressed as the minimal
//! set of CIDR blocks covering exactly the remaining addresses.

use crate::types::{host_mask, AddrFamily, NetworkRange};

/// Minimal CIDR decomposition of the inclusive interval `[first, last]`.
///
/// Returns blocks in ascending order. An empty vec when `first > last`.
pub fn cidr_cover(family: AddrFamily, first: u128, last: u128) -> Vec<NetworkRange> {
    let bits = family.bits();
    let mut blocks = Vec::new();
    if first > last {
        return blocks;
    }

    let mut start = first;
    loop {
        // Largest block aligned at `start` that does not run past `last`.
        let mut host_bits = if start == 0 {
            bits
        } else {
            (start.trailing_zeros() as u8).min(bits)
        };
        while host_bits > 0 && (start | host_mask(host_bits)) > last {
            host_bits -= 1;
        }
        blocks.push(NetworkRange::from_bits(family, start, bits - host_bits));

        let end = start | host_mask(host_bits);
        if end >= last {
            break;
        }
        start = end + 1;
    }
    blocks
}

/// `range` minus `hole`, as CIDR blocks in ascending order.
///
/// Disjoint inputs return `range` unchanged; a hole covering all of `range`
/// returns nothing.
pub fn exclude(range: NetworkRange, hole: NetworkRange) -> Vec<NetworkRange> {
    if !range.overlaps(&hole) {
        return vec![range];
    }
    if hole.contains_range(&range) {
        return Vec::new();
    }

    let mut parts = Vec::new();
    let mut current = range;
    while current != hole {
        // `hole` is a proper subset of `current`, so `current` has halves.
        let Some((lo, hi)) = current.halves() else { break };
        if lo.contains_range(&hole) {
            parts.push(hi);
            current = lo;
        } else {
            parts.push(lo);
            current = hi;
        }
    }
    parts.sort();
    parts
}

/// `range` minus the union of `holes`.
///
/// Holes may come in any order and may nest or fall outside `range`; only
/// their intersection with `range` matters. Output is ascending and minimal.
pub fn subtract(range: NetworkRange, holes: &[NetworkRange]) -> Vec<NetworkRange> {
    let mut inside: Vec<NetworkRange> = holes
        .iter()
        .filter(|h| h.overlaps(&range))
        .copied()
        .collect();
    if inside.iter().any(|h| h.contains_range(&range)) {
        return Vec::new();
    }
    if inside.is_empty() {
        return vec![range];
    }
    inside.sort();

    let family = range.family();
    let (first, last) = range.bounds();
    let mut parts = Vec::new();
    // `cursor` is the first address not yet accounted for; `None` once the
    // sweep has run off the end of the address space.
    let mut cursor = Some(first);

    for hole in &inside {
        let Some(pos) = cursor else { break };
        let (h_first, h_last) = hole.bounds();
        if h_last < pos {
            // Nested inside an earlier hole.
            continue;
        }
        if h_first > pos {
            parts.extend(cidr_cover(family, pos, h_first - 1));
        }
        cursor = h_last.checked_add(1);
    }
    if let Some(pos) = cursor {
        if pos <= last {
            parts.extend(cidr_cover(family, pos, last));
        }
    }
    parts
}
