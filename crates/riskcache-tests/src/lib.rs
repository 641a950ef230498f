//! Integration test suite for the IP-risk cache.
//!
//! Exercises the cache end to end against fake providers and real RocksDB
//! stores, and checks the index invariants under randomized insert orders.

pub mod helpers;
