//! RocksDB-backed persistent range store.
//!
//! Implements [`RangeStore`] over a single-keyspace RocksDB directory. The
//! database is never held open between calls: [`RocksStore::load_all`] opens,
//! reads every entry, and closes; [`RocksStore::write_all`] reopens for the
//! duration of one atomic [`WriteBatch`].
//!
//! Read-only sessions open with `DB::open_for_read_only`, so they never take
//! the writer lock and never modify the data files. Their info log goes to a
//! separate directory, leaving every file under the store path unchanged.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rocksdb::{IteratorMode, Options, WriteBatch, DB};

use riskcache_core::constants::{
    MAX_RECORD_BYTES, READ_ONLY_LOG_DIR, READ_ONLY_LOG_FILES_KEPT, RECORD_FORMAT_VERSION,
};
use riskcache_core::error::StoreError;
use riskcache_core::store::{FlushReport, Loaded, RangeStore};
use riskcache_core::types::{AccessMode, NetworkRange, RiskRecord};

/// Versioned envelope around a persisted record.
#[derive(bincode::Encode, bincode::Decode)]
struct StoredRecord {
    version: u8,
    record: RiskRecord,
}

/// Encode a record as a store value.
pub fn encode_record(record: &RiskRecord) -> Result<Vec<u8>, StoreError> {
    let envelope = StoredRecord { version: RECORD_FORMAT_VERSION, record: record.clone() };
    let bytes = bincode::encode_to_vec(&envelope, bincode::config::standard())
        .map_err(|e| StoreError::Encoding(e.to_string()))?;
    if bytes.len() > MAX_RECORD_BYTES {
        return Err(StoreError::Encoding(format!(
            "record is {} bytes, limit is {}",
            bytes.len(),
            MAX_RECORD_BYTES
        )));
    }
    Ok(bytes)
}

/// Decode a store value produced by [`encode_record`].
pub fn decode_record(bytes: &[u8]) -> Result<RiskRecord, StoreError> {
    if bytes.len() > MAX_RECORD_BYTES {
        return Err(StoreError::Decoding(format!("value of {} bytes exceeds limit", bytes.len())));
    }
    let (envelope, _): (StoredRecord, usize) =
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Decoding(e.to_string()))?;
    if envelope.version != RECORD_FORMAT_VERSION {
        return Err(StoreError::Decoding(format!(
            "unsupported record version {}",
            envelope.version
        )));
    }
    Ok(envelope.record)
}

fn backend(e: rocksdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// RocksDB range store at a fixed path.
#[derive(Clone, Debug)]
pub struct RocksStore {
    path: PathBuf,
    mode: AccessMode,
    /// Info-log directory for read-only opens.
    log_dir: PathBuf,
}

impl RocksStore {
    /// Validate the store at `path` for `mode`.
    ///
    /// Read-only requires an existing database and fails with
    /// [`StoreError::Unavailable`] otherwise. Writable creates an empty
    /// database when none exists. The handle is closed before returning.
    pub fn open(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self, StoreError> {
        Self::open_with_log_dir(path, mode, std::env::temp_dir().join(READ_ONLY_LOG_DIR))
    }

    /// Shorthand for `open(path, AccessMode::ReadOnly)`.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open(path, AccessMode::ReadOnly)
    }

    /// Like [`RocksStore::open`], with read-only info logs written under
    /// `log_dir`. Writable sessions log inside the store as usual.
    pub fn open_with_log_dir(
        path: impl AsRef<Path>,
        mode: AccessMode,
        log_dir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let store = Self { path: path.as_ref().to_path_buf(), mode, log_dir: log_dir.into() };
        store.connect()?;
        tracing::debug!(path = %store.path.display(), ?mode, "range store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    fn connect(&self) -> Result<DB, StoreError> {
        match self.mode {
            AccessMode::ReadOnly => {
                if !self.path.join("CURRENT").is_file() {
                    return Err(self.unavailable("no database at this path"));
                }
                std::fs::create_dir_all(&self.log_dir)
                    .map_err(|e| self.unavailable(&format!("log dir: {e}")))?;
                let mut opts = Options::default();
                opts.set_db_log_dir(&self.log_dir);
                opts.set_keep_log_file_num(READ_ONLY_LOG_FILES_KEPT);
                DB::open_for_read_only(&opts, &self.path, false)
                    .map_err(|e| self.unavailable(&e.to_string()))
            }
            AccessMode::Writable => {
                let mut opts = Options::default();
                opts.create_if_missing(true);
                DB::open(&opts, &self.path).map_err(|e| self.unavailable(&e.to_string()))
            }
        }
    }

    fn unavailable(&self, reason: &str) -> StoreError {
        StoreError::Unavailable {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl RangeStore for RocksStore {
    fn mode(&self) -> AccessMode {
        self.mode
    }

    fn load_all(&self) -> Result<Loaded, StoreError> {
        let db = self.connect()?;
        let mut loaded = Loaded::default();

        for item in db.iterator(IteratorMode::Start) {
            let (key, value) = item.map_err(backend)?;
            let range = match NetworkRange::from_key_bytes(&key) {
                Ok(range) => range,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping store entry with invalid key");
                    loaded.corrupt += 1;
                    continue;
                }
            };
            match decode_record(&value) {
                Ok(record) => loaded.entries.push((range, record)),
                Err(e) => {
                    tracing::warn!(%range, error = %e, "skipping undecodable store entry");
                    loaded.corrupt += 1;
                }
            }
        }

        tracing::debug!(entries = loaded.entries.len(), corrupt = loaded.corrupt, "range store loaded");
        Ok(loaded)
    }

    fn write_all(&mut self, entries: &[(NetworkRange, RiskRecord)]) -> Result<FlushReport, StoreError> {
        if !self.mode.is_writable() {
            return Err(StoreError::ReadOnly);
        }
        let db = self.connect()?;
        let mut batch = WriteBatch::default();
        let mut report = FlushReport::default();
        let mut live: HashSet<Vec<u8>> = HashSet::with_capacity(entries.len());

        for (range, record) in entries {
            let key = range.to_key_bytes();
            match encode_record(record) {
                Ok(value) => {
                    batch.put(&key, value);
                    report.written += 1;
                }
                Err(e) => {
                    // The previous value, if any, stays on disk.
                    tracing::warn!(%range, error = %e, "skipping record that failed to encode");
                    report.failed += 1;
                }
            }
            live.insert(key);
        }

        for item in db.iterator(IteratorMode::Start) {
            let (key, _) = item.map_err(backend)?;
            if !live.contains(&*key) {
                batch.delete(&key);
                report.removed += 1;
            }
        }

        db.write(batch).map_err(backend)?;
        db.flush().map_err(backend)?;
        tracing::info!(
            written = report.written,
            removed = report.removed,
            failed = report.failed,
            "range store flushed"
        );
        Ok(report)
    }
}
