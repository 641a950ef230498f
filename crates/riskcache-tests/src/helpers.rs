//! Shared fakes for integration tests.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use riskcache_core::error::{ProviderError, StoreError};
use riskcache_core::store::{FlushReport, Loaded, MemoryStore, RangeStore};
use riskcache_core::traits::{RegistryProvider, ReputationProvider};
use riskcache_core::types::{AccessMode, NetworkRange, Registration, Reputation, RiskRecord};

/// Parse a range literal.
pub fn range(s: &str) -> NetworkRange {
    s.parse().unwrap()
}

/// Call counter and failure switch shared between a fake and the test body.
#[derive(Clone, Debug, Default)]
pub struct ProviderHandle {
    calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl ProviderHandle {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// While set, every query fails with `ProviderError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn enter(&self) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

/// Registry backed by an allocation table, with optional scripted answers.
///
/// Scripted answers are returned one per query, in order, before the table
/// is consulted. The table answers with every allocation containing the
/// queried address.
#[derive(Default)]
pub struct FakeRegistry {
    allocations: Vec<Registration>,
    script: Mutex<VecDeque<Vec<Registration>>>,
    handle: ProviderHandle,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an allocation owned by `organization`.
    pub fn allocate(mut self, cidr: &str, organization: &str) -> Self {
        self.allocations.push(Registration {
            organization: Some(organization.to_string()),
            ..Registration::bare(range(cidr))
        });
        self
    }

    /// Queue one answer listing `cidrs`.
    pub fn then_answer(self, cidrs: &[&str]) -> Self {
        let answer = cidrs.iter().map(|c| Registration::bare(range(c))).collect();
        self.script.lock().unwrap().push_back(answer);
        self
    }

    pub fn handle(&self) -> ProviderHandle {
        self.handle.clone()
    }
}

impl RegistryProvider for FakeRegistry {
    fn query(&self, ip: IpAddr) -> Result<Vec<Registration>, ProviderError> {
        self.handle.enter()?;
        if let Some(answer) = self.script.lock().unwrap().pop_front() {
            return Ok(answer);
        }
        Ok(self
            .allocations
            .iter()
            .filter(|a| a.range.contains(&ip))
            .cloned()
            .collect())
    }
}

/// Reputation keyed by range, narrowest match wins, with scripted scores.
pub struct FakeReputation {
    scores: Vec<(NetworkRange, f64)>,
    default_score: f64,
    script: Mutex<VecDeque<f64>>,
    handle: ProviderHandle,
}

impl FakeReputation {
    pub fn new(default_score: f64) -> Self {
        Self {
            scores: Vec::new(),
            default_score,
            script: Mutex::new(VecDeque::new()),
            handle: ProviderHandle::default(),
        }
    }

    pub fn score(mut self, cidr: &str, score: f64) -> Self {
        self.scores.push((range(cidr), score));
        self
    }

    /// Queue one score returned ahead of the table.
    pub fn then_score(self, score: f64) -> Self {
        self.script.lock().unwrap().push_back(score);
        self
    }

    pub fn handle(&self) -> ProviderHandle {
        self.handle.clone()
    }
}

/// Category label for a score.
pub fn category_for(score: f64) -> &'static str {
    match score {
        s if s < 33.0 => "low",
        s if s < 66.0 => "medium",
        _ => "high",
    }
}

impl ReputationProvider for FakeReputation {
    fn query(&self, ip: IpAddr) -> Result<Reputation, ProviderError> {
        self.handle.enter()?;
        let score = match self.script.lock().unwrap().pop_front() {
            Some(score) => score,
            None => self
                .scores
                .iter()
                .filter(|(r, _)| r.contains(&ip))
                .max_by_key(|(r, _)| r.prefix_len())
                .map(|(_, s)| *s)
                .unwrap_or(self.default_score),
        };
        Ok(Reputation { score, category: category_for(score).to_string(), comment: None })
    }
}

/// Memory store whose `load_all` returns entries in a seeded random order.
pub struct ShuffledStore {
    inner: MemoryStore,
    seed: u64,
}

impl ShuffledStore {
    pub fn new(inner: MemoryStore, seed: u64) -> Self {
        Self { inner, seed }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

impl RangeStore for ShuffledStore {
    fn mode(&self) -> AccessMode {
        self.inner.mode()
    }

    fn load_all(&self) -> Result<Loaded, StoreError> {
        let mut loaded = self.inner.load_all()?;
        loaded.entries.shuffle(&mut StdRng::seed_from_u64(self.seed));
        Ok(loaded)
    }

    fn write_all(&mut self, entries: &[(NetworkRange, RiskRecord)]) -> Result<FlushReport, StoreError> {
        self.inner.write_all(entries)
    }
}

/// Contents of every file under a RocksDB directory, sorted by name.
pub fn snapshot_dir(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = std::fs::read_dir(path)
        .unwrap()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().unwrap().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .map(|name| {
            let bytes = std::fs::read(path.join(&name)).unwrap();
            (name, bytes)
        })
        .collect();
    files.sort();
    files
}
