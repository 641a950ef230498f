//! # riskcache
//! IP-risk lookup cache over disjoint network ranges.
//!
//! [`cache::RangeCache`] answers lookups from an in-memory range index,
//! consulting the reputation and registry providers only on a writable miss,
//! and mirrors the index to a RocksDB store ([`storage::RocksStore`]).

pub mod backfill;
pub mod cache;
pub mod config;
pub mod logging;
pub mod storage;

pub use cache::{CacheStats, RangeCache, Resolution};
pub use config::CacheConfig;
pub use storage::RocksStore;
