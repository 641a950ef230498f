//! # riskcache-core
//! Foundation types, range index, and split algorithm for the IP-risk cache.
//!
//! Nothing here touches the network or the disk; the cache and its RocksDB
//! store live in `riskcache-lib`.

pub mod constants;
pub mod error;
pub mod index;
pub mod insert;
pub mod split;
pub mod store;
pub mod traits;
pub mod types;
pub mod verify;
