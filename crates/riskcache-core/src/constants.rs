//! Cache-wide constants.

/// Store key tag for IPv4 ranges.
pub const KEY_TAG_V4: u8 = 4;

/// Store key tag for IPv6 ranges.
pub const KEY_TAG_V6: u8 = 6;

/// Version byte of the persisted record envelope.
pub const RECORD_FORMAT_VERSION: u8 = 1;

/// Largest encoded record accepted by a flush. Oversized records are skipped.
pub const MAX_RECORD_BYTES: usize = 64 * 1024;

/// Default store name inside the data directory.
pub const DEFAULT_DB_NAME: &str = "riskdb";

/// Directory under the system temp dir that receives RocksDB info logs of
/// read-only sessions. Keeps the store directory untouched by those opens.
pub const READ_ONLY_LOG_DIR: &str = "riskcache-readonly-logs";

/// Info-log files RocksDB keeps per read-only store before deleting old ones.
pub const READ_ONLY_LOG_FILES_KEPT: usize = 2;
