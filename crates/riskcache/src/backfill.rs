//! Batch resolution of address lists.
//!
//! Resolves every unique address in a list through a writable cache,
//! continuing past failures, and optionally flushes once at the end.

use std::collections::HashSet;

use riskcache_core::error::CacheError;
use riskcache_core::store::{FlushReport, RangeStore};

use crate::cache::{RangeCache, Resolution};

/// Progress is logged every this many addresses.
const PROGRESS_INTERVAL: usize = 500;

/// Tally of a backfill run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Unique inputs processed, valid or not.
    pub processed: usize,
    /// Repeated inputs skipped.
    pub duplicates: usize,
    pub hits: usize,
    /// Addresses resolved through the providers.
    pub resolved: usize,
    /// Index entries added during the run (net of carves and absorbs).
    pub ranges_added: isize,
    /// Addresses still uncovered after the run.
    pub misses: usize,
    pub failures: usize,
    pub invalid: usize,
    /// Set when a flush was requested and performed.
    pub flush: Option<FlushReport>,
}

/// Resolve each unique address in `ips`.
///
/// A failed lookup is logged and counted, never fatal. When `flush` is set
/// and the cache is writable the index is written once after the last
/// address; a read-only cache skips the flush. Only the flush itself can
/// fail the run.
pub fn backfill<S, I, T>(
    cache: &mut RangeCache<S>,
    ips: I,
    flush: bool,
) -> Result<BackfillReport, CacheError>
where
    S: RangeStore,
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut report = BackfillReport::default();
    let mut seen = HashSet::new();
    let start_len = cache.len();

    for ip in ips {
        let ip = ip.as_ref().trim();
        if !seen.insert(ip.to_string()) {
            report.duplicates += 1;
            continue;
        }
        report.processed += 1;

        match cache.resolve(ip) {
            Ok(Resolution::Hit(_)) => report.hits += 1,
            Ok(Resolution::Inserted(_)) => report.resolved += 1,
            Ok(Resolution::Miss) => report.misses += 1,
            Err(CacheError::InvalidAddress(e)) => {
                tracing::warn!(input = ip, error = %e, "skipping invalid address");
                report.invalid += 1;
            }
            Err(e) if e.is_lookup_local() => {
                tracing::warn!(input = ip, error = %e, "lookup failed, continuing");
                report.failures += 1;
            }
            Err(e) => return Err(e),
        }

        if report.processed % PROGRESS_INTERVAL == 0 {
            tracing::info!(
                processed = report.processed,
                resolved = report.resolved,
                failures = report.failures,
                "backfill progress"
            );
        }
    }

    report.ranges_added = cache.len() as isize - start_len as isize;

    if flush {
        if cache.mode().is_writable() {
            report.flush = Some(cache.flush()?);
        } else {
            tracing::warn!("read-only cache, skipping flush");
        }
    }

    tracing::info!(
        processed = report.processed,
        hits = report.hits,
        resolved = report.resolved,
        failures = report.failures,
        invalid = report.invalid,
        "backfill complete"
    );
    Ok(report)
}
