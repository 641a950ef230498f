//! The range cache: an in-memory [`RangeIndex`] in front of two providers,
//! mirrored to a [`RangeStore`].
//!
//! Lifecycle: [`RangeCache::open`] loads the whole store, lookups mutate the
//! index only on writable misses, and [`RangeCache::flush`] writes the index
//! back. Unflushed inserts are lost on a crash and re-resolved on the next
//! lookup of the same address.

use std::net::IpAddr;

use chrono::Utc;

use riskcache_core::error::{CacheError, ProviderError};
use riskcache_core::index::RangeIndex;
use riskcache_core::insert::{InsertOutcome, RedundantChildPolicy};
use riskcache_core::store::{FlushReport, RangeStore};
use riskcache_core::traits::{RegistryProvider, ReputationProvider};
use riskcache_core::types::{parse_address, AccessMode, NetworkRange, Registration, Reputation, RiskRecord};
use riskcache_core::verify::{self, Family};

use crate::config::CacheConfig;
use crate::storage::RocksStore;

/// How a lookup was answered.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// Served from the index.
    Hit(RiskRecord),
    /// Resolved through the providers and inserted.
    Inserted(RiskRecord),
    /// Not covered. Read-only sessions, or the registry's ranges did not
    /// contain the address.
    Miss,
}

impl Resolution {
    pub fn record(&self) -> Option<&RiskRecord> {
        match self {
            Self::Hit(r) | Self::Inserted(r) => Some(r),
            Self::Miss => None,
        }
    }

    pub fn into_record(self) -> Option<RiskRecord> {
        match self {
            Self::Hit(r) | Self::Inserted(r) => Some(r),
            Self::Miss => None,
        }
    }
}

/// Per-session counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries accepted from the store at open.
    pub loaded: usize,
    /// Store entries dropped at open (undecodable or overlapping).
    pub dropped_on_load: usize,
    pub hits: u64,
    pub misses: u64,
    /// Candidate ranges that changed the index.
    pub ranges_inserted: u64,
    /// Candidate ranges skipped as already known or redundant.
    pub ranges_skipped: u64,
    pub provider_failures: u64,
    pub invalid_addresses: u64,
}

/// IP-risk cache keyed by disjoint network ranges.
pub struct RangeCache<S: RangeStore = RocksStore> {
    store: S,
    index: RangeIndex<RiskRecord>,
    mode: AccessMode,
    reputation: Option<Box<dyn ReputationProvider>>,
    registry: Option<Box<dyn RegistryProvider>>,
    policy: RedundantChildPolicy,
    families: Vec<Family>,
    stats: CacheStats,
}

impl RangeCache<RocksStore> {
    /// Open the RocksDB store named by `config` and load it.
    pub fn open_with_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let store = RocksStore::open(config.db_path(), config.mode)?;
        Self::open(store)
    }
}

impl<S: RangeStore> RangeCache<S> {
    /// Load every entry of `store` into a fresh index.
    ///
    /// The session mode is the store's mode. Corrupt entries and entries
    /// overlapping an earlier one are dropped with a warning.
    pub fn open(store: S) -> Result<Self, CacheError> {
        let mode = store.mode();
        let loaded = store.load_all()?;
        let total = loaded.entries.len();
        let (index, rejects) = RangeIndex::from_entries(loaded.entries);

        for (range, _) in &rejects {
            tracing::warn!(%range, "dropping stored range that overlaps another");
        }
        if loaded.corrupt > 0 {
            tracing::warn!(count = loaded.corrupt, "skipped corrupt store entries");
        }
        tracing::info!(ranges = index.len(), of = total, ?mode, "range cache loaded");

        let stats = CacheStats {
            loaded: index.len(),
            dropped_on_load: loaded.corrupt + rejects.len(),
            ..CacheStats::default()
        };
        Ok(Self {
            store,
            index,
            mode,
            reputation: None,
            registry: None,
            policy: RedundantChildPolicy::default(),
            families: Vec::new(),
            stats,
        })
    }

    /// Attach the providers consulted on writable misses.
    pub fn with_providers(
        mut self,
        reputation: Box<dyn ReputationProvider>,
        registry: Box<dyn RegistryProvider>,
    ) -> Self {
        self.reputation = Some(reputation);
        self.registry = Some(registry);
        self
    }

    pub fn with_policy(mut self, policy: RedundantChildPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve `ip`, logging failures and collapsing them to `None`.
    pub fn find(&mut self, ip: &str) -> Option<RiskRecord> {
        match self.resolve(ip) {
            Ok(resolution) => resolution.into_record(),
            Err(CacheError::InvalidAddress(e)) => {
                tracing::warn!(input = ip, error = %e, "ignoring invalid address");
                None
            }
            Err(e) => {
                tracing::warn!(input = ip, error = %e, "lookup failed");
                None
            }
        }
    }

    /// Resolve `ip`, reporting why a lookup failed.
    ///
    /// A provider failure leaves the index untouched and is not cached, so
    /// the next lookup of the same address tries the providers again.
    pub fn resolve(&mut self, ip: &str) -> Result<Resolution, CacheError> {
        let addr = match parse_address(ip) {
            Ok(addr) => addr,
            Err(e) => {
                self.stats.invalid_addresses += 1;
                return Err(e.into());
            }
        };

        if let Some((range, record)) = self.index.find(addr) {
            tracing::debug!(%addr, %range, "cache hit");
            self.stats.hits += 1;
            return Ok(Resolution::Hit(record.clone()));
        }
        self.stats.misses += 1;

        if !self.mode.is_writable() {
            tracing::debug!(%addr, "cache miss (read-only)");
            return Ok(Resolution::Miss);
        }

        let (registrations, reputation) = match self.query_providers(addr) {
            Ok(found) => found,
            Err(e) => {
                self.stats.provider_failures += 1;
                tracing::warn!(%addr, error = %e, "provider lookup failed");
                return Err(e.into());
            }
        };

        let timestamp = Utc::now().timestamp();
        for registration in &registrations {
            let record = RiskRecord::from_lookup(registration, &reputation, timestamp);
            self.insert(registration.range, record)?;
        }

        match self.index.find(addr) {
            Some((range, record)) => {
                tracing::debug!(%addr, %range, "resolved through providers");
                Ok(Resolution::Inserted(record.clone()))
            }
            None => {
                tracing::warn!(%addr, "registry ranges do not cover the queried address");
                Ok(Resolution::Miss)
            }
        }
    }

    /// Index lookup only. Never calls a provider, even when writable.
    pub fn peek(&self, ip: &str) -> Option<RiskRecord> {
        match parse_address(ip) {
            Ok(addr) => self.lookup(addr).cloned(),
            Err(e) => {
                tracing::warn!(input = ip, error = %e, "ignoring invalid address");
                None
            }
        }
    }

    /// Record of the stored range containing `addr`. O(log n).
    pub fn lookup(&self, addr: IpAddr) -> Option<&RiskRecord> {
        self.index.find(addr).map(|(_, record)| record)
    }

    /// Write the full index to the store.
    pub fn flush(&mut self) -> Result<FlushReport, CacheError> {
        if !self.mode.is_writable() {
            return Err(CacheError::ReadOnly);
        }
        let entries: Vec<(NetworkRange, RiskRecord)> =
            self.index.iter().map(|(r, v)| (*r, v.clone())).collect();
        let report = self.store.write_all(&entries)?;
        if report.failed > 0 {
            tracing::warn!(count = report.failed, "records left unflushed");
        }
        Ok(report)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn index(&self) -> &RangeIndex<RiskRecord> {
        &self.index
    }

    /// All `(range, record)` pairs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (&NetworkRange, &RiskRecord)> {
        self.index.iter()
    }

    /// Subdivisions performed this session.
    pub fn families(&self) -> &[Family] {
        &self.families
    }

    /// Families as a JSON array, for offline verification.
    pub fn export_families(&self) -> Result<String, serde_json::Error> {
        verify::families_to_json(&self.families)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn query_providers(&self, addr: IpAddr) -> Result<(Vec<Registration>, Reputation), ProviderError> {
        let (Some(registry), Some(reputation)) = (&self.registry, &self.reputation) else {
            return Err(ProviderError::NotConfigured);
        };
        let mut registrations = registry.query(addr)?;
        if registrations.is_empty() {
            return Err(ProviderError::NoAllocation(addr.to_string()));
        }
        let score = reputation.query(addr)?;
        // Widest first: narrower same-score ranges then land as redundant
        // instead of being inserted and absorbed again.
        registrations.sort_by_key(|r| r.range.prefix_len());
        Ok((registrations, score))
    }

    fn insert(&mut self, candidate: NetworkRange, record: RiskRecord) -> Result<(), CacheError> {
        let insertion = self.index.insert_split(candidate, record, self.policy)?;
        match &insertion.outcome {
            InsertOutcome::Inserted { absorbed } => {
                tracing::debug!(range = %candidate, absorbed, "range inserted");
            }
            InsertOutcome::Subdivided { parts, children, absorbed } => {
                tracing::debug!(range = %candidate, parts, children, absorbed, "range subdivided around known children");
            }
            InsertOutcome::Carved { parent } => {
                tracing::debug!(range = %candidate, %parent, "known parent carved");
            }
            InsertOutcome::AlreadyKnown => {
                tracing::debug!(range = %candidate, "range already known");
            }
            InsertOutcome::Redundant { parent } => {
                tracing::debug!(range = %candidate, %parent, "range redundant with known parent");
            }
        }
        if insertion.outcome.changed() {
            self.stats.ranges_inserted += 1;
        } else {
            self.stats.ranges_skipped += 1;
        }
        if let Some(family) = insertion.family {
            self.families.push(family);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use riskcache_core::store::MemoryStore;

    mock! {
        Registrar {}
        impl RegistryProvider for Registrar {
            fn query(&self, ip: IpAddr) -> Result<Vec<Registration>, ProviderError>;
        }
    }

    mock! {
        Scorer {}
        impl ReputationProvider for Scorer {
            fn query(&self, ip: IpAddr) -> Result<Reputation, ProviderError>;
        }
    }

    fn r(s: &str) -> NetworkRange {
        s.parse().unwrap()
    }

    fn reputation(score: f64) -> Reputation {
        Reputation { score, category: "test".into(), comment: None }
    }

    fn registry_returning(ranges: &'static [&'static str], times: usize) -> MockRegistrar {
        let mut registry = MockRegistrar::new();
        registry.expect_query().times(times).returning(move |_| {
            Ok(ranges.iter().map(|s| Registration::bare(s.parse().unwrap())).collect())
        });
        registry
    }

    fn reputation_returning(score: f64, times: usize) -> MockScorer {
        let mut rep = MockScorer::new();
        rep.expect_query().times(times).returning(move |_| Ok(reputation(score)));
        rep
    }

    fn writable_cache(registry: MockRegistrar, rep: MockScorer) -> RangeCache<MemoryStore> {
        RangeCache::open(MemoryStore::new(AccessMode::Writable))
            .unwrap()
            .with_providers(Box::new(rep), Box::new(registry))
    }

    #[test]
    fn miss_then_hit_queries_providers_once() {
        let mut cache = writable_cache(registry_returning(&["10.0.0.0/24"], 1), reputation_returning(42.0, 1));

        let first = cache.resolve("10.0.0.10").unwrap();
        assert!(matches!(first, Resolution::Inserted(ref rec) if rec.score == 42.0));
        let second = cache.resolve("10.0.0.200").unwrap();
        assert!(matches!(second, Resolution::Hit(ref rec) if rec.score == 42.0));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.ranges_inserted), (1, 1, 1));
    }

    #[test]
    fn read_only_miss_never_calls_providers() {
        let mut registry = MockRegistrar::new();
        registry.expect_query().never();
        let mut rep = MockScorer::new();
        rep.expect_query().never();

        let store = MemoryStore::with_entries(
            AccessMode::ReadOnly,
            [(r("10.0.0.0/24"), RiskRecord::scored(5.0, "low"))],
        );
        let mut cache = RangeCache::open(store).unwrap().with_providers(Box::new(rep), Box::new(registry));

        assert_eq!(cache.resolve("192.0.2.1").unwrap(), Resolution::Miss);
        assert_eq!(cache.find("10.0.0.9").unwrap().score, 5.0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn provider_failure_is_not_cached() {
        let mut registry = MockRegistrar::new();
        let mut calls = 0;
        registry.expect_query().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(ProviderError::Unavailable("timeout".into()))
            } else {
                Ok(vec![Registration::bare("198.51.100.0/24".parse().unwrap())])
            }
        });
        let mut cache = writable_cache(registry, reputation_returning(7.0, 1));

        let err = cache.resolve("198.51.100.7").unwrap_err();
        assert!(matches!(err, CacheError::ProviderUnavailable(ProviderError::Unavailable(_))));
        assert!(cache.is_empty());

        assert!(cache.find("198.51.100.7").is_some());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().provider_failures, 1);
    }

    #[test]
    fn reputation_failure_leaves_index_untouched() {
        let mut rep = MockScorer::new();
        rep.expect_query()
            .times(1)
            .returning(|_| Err(ProviderError::Malformed("bad json".into())));
        let mut cache = writable_cache(registry_returning(&["10.0.0.0/24"], 1), rep);

        assert!(cache.find("10.0.0.1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn empty_registry_answer_is_a_failure() {
        let mut rep = MockScorer::new();
        rep.expect_query().never();
        let mut cache = writable_cache(registry_returning(&[], 1), rep);

        let err = cache.resolve("10.0.0.1").unwrap_err();
        assert!(matches!(err, CacheError::ProviderUnavailable(ProviderError::NoAllocation(_))));
    }

    #[test]
    fn missing_providers_are_reported() {
        let mut cache = RangeCache::open(MemoryStore::new(AccessMode::Writable)).unwrap();
        let err = cache.resolve("10.0.0.1").unwrap_err();
        assert!(matches!(err, CacheError::ProviderUnavailable(ProviderError::NotConfigured)));
    }

    #[test]
    fn invalid_address_is_counted() {
        let mut cache = RangeCache::open(MemoryStore::new(AccessMode::ReadOnly)).unwrap();
        assert!(matches!(cache.resolve("10.0.0.300"), Err(CacheError::InvalidAddress(_))));
        assert!(cache.find("not an ip").is_none());
        assert!(cache.peek("").is_none());
        assert_eq!(cache.stats().invalid_addresses, 2);
    }

    #[test]
    fn registry_range_not_covering_address_is_still_inserted() {
        let mut cache = writable_cache(registry_returning(&["203.0.113.0/24"], 1), reputation_returning(1.0, 1));
        assert_eq!(cache.resolve("10.0.0.1").unwrap(), Resolution::Miss);
        assert_eq!(cache.len(), 1);
        assert!(cache.peek("203.0.113.5").is_some());
    }

    #[test]
    fn nested_registry_ranges_keep_widest_on_same_score() {
        let mut cache = writable_cache(
            registry_returning(&["10.1.2.0/24", "10.0.0.0/8"], 1),
            reputation_returning(3.0, 1),
        );
        cache.resolve("10.1.2.3").unwrap();
        let ranges: Vec<_> = cache.iter().map(|(r, _)| *r).collect();
        assert_eq!(ranges, vec![r("10.0.0.0/8")]);
        assert_eq!(cache.stats().ranges_skipped, 1);
    }

    #[test]
    fn peek_does_not_call_providers() {
        let mut registry = MockRegistrar::new();
        registry.expect_query().never();
        let mut rep = MockScorer::new();
        rep.expect_query().never();
        let cache = writable_cache(registry, rep);
        assert!(cache.peek("10.0.0.1").is_none());
    }

    #[test]
    fn subdivision_is_recorded_as_family() {
        let mut registry = MockRegistrar::new();
        let mut calls = 0;
        registry.expect_query().times(2).returning(move |_| {
            calls += 1;
            let range = if calls == 1 { "10.0.0.0/25" } else { "10.0.0.0/24" };
            Ok(vec![Registration::bare(range.parse().unwrap())])
        });
        let mut rep = MockScorer::new();
        let mut scores = vec![10.0, 90.0];
        rep.expect_query().times(2).returning(move |_| Ok(reputation(scores.pop().unwrap())));
        let mut cache = writable_cache(registry, rep);

        assert_eq!(cache.find("10.0.0.10").unwrap().score, 90.0);
        assert_eq!(cache.find("10.0.0.200").unwrap().score, 10.0);
        assert_eq!(cache.families().len(), 1);
        assert_eq!(cache.families()[0].parent, r("10.0.0.0/24"));

        let json = cache.export_families().unwrap();
        let back = verify::families_from_json(&json).unwrap();
        assert!(verify::verify_family(&back[0]).is_ok());
    }

    fn registry_in_turn(answers: &'static [(&'static str, &'static str)]) -> MockRegistrar {
        let mut registry = MockRegistrar::new();
        let mut next = 0;
        registry.expect_query().times(answers.len()).returning(move |_| {
            let (range, org) = answers[next];
            next += 1;
            Ok(vec![Registration {
                organization: Some(org.into()),
                ..Registration::bare(range.parse().unwrap())
            }])
        });
        registry
    }

    #[test]
    fn keep_policy_preserves_same_score_child() {
        let registry = registry_in_turn(&[("10.0.0.0/26", "Child Org"), ("10.0.0.0/24", "Parent Org")]);
        let mut cache = writable_cache(registry, reputation_returning(30.0, 2))
            .with_policy(RedundantChildPolicy::Keep);

        assert!(cache.find("10.0.0.1").is_some());
        assert!(cache.find("10.0.0.200").is_some());

        let ranges: Vec<_> = cache.iter().map(|(r, _)| *r).collect();
        assert_eq!(ranges, vec![r("10.0.0.0/26"), r("10.0.0.64/26"), r("10.0.0.128/25")]);
        assert_eq!(cache.peek("10.0.0.1").unwrap().organization.as_deref(), Some("Child Org"));
        assert_eq!(cache.peek("10.0.0.200").unwrap().organization.as_deref(), Some("Parent Org"));
        assert!(cache.families()[0].absorbed.is_empty());
    }

    #[test]
    fn default_policy_records_absorbed_child() {
        let registry = registry_in_turn(&[("10.0.0.0/26", "Child Org"), ("10.0.0.0/24", "Parent Org")]);
        let mut cache = writable_cache(registry, reputation_returning(30.0, 2));

        cache.find("10.0.0.1");
        cache.find("10.0.0.200");

        let ranges: Vec<_> = cache.iter().map(|(r, _)| *r).collect();
        assert_eq!(ranges, vec![r("10.0.0.0/24")]);
        assert_eq!(cache.families().len(), 1);
        assert_eq!(cache.families()[0].absorbed, vec![r("10.0.0.0/26")]);
    }

    #[test]
    fn flush_writes_index_to_store() {
        let mut cache = writable_cache(registry_returning(&["10.0.0.0/24"], 1), reputation_returning(2.0, 1));
        cache.find("10.0.0.1");
        let report = cache.flush().unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(cache.store().flush_count(), 1);
        assert_eq!(cache.store().get(&r("10.0.0.0/24")).unwrap().score, 2.0);
    }

    #[test]
    fn read_only_flush_is_refused() {
        let mut cache = RangeCache::open(MemoryStore::new(AccessMode::ReadOnly)).unwrap();
        assert!(matches!(cache.flush(), Err(CacheError::ReadOnly)));
        assert_eq!(cache.store().flush_count(), 0);
    }

    #[test]
    fn overlapping_store_entries_are_dropped_on_open() {
        let store = MemoryStore::with_entries(
            AccessMode::ReadOnly,
            [
                (r("10.0.0.0/16"), RiskRecord::scored(1.0, "wide")),
                (r("10.0.5.0/24"), RiskRecord::scored(2.0, "narrow")),
                (r("192.0.2.0/24"), RiskRecord::scored(3.0, "other")),
            ],
        );
        let cache = RangeCache::open(store).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().dropped_on_load, 1);
        assert!(cache.index().verify().is_ok());
    }
}
