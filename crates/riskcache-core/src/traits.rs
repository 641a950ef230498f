//! Trait interfaces at the cache's seams.
//!
//! - [`ReputationProvider`] scores an address (external service)
//! - [`RegistryProvider`] reports the allocations covering an address
//! - [`RangeStore`](crate::store::RangeStore) persists the index (see `store`)

use std::net::IpAddr;

use crate::error::ProviderError;
use crate::types::{Registration, Reputation};

/// Source of risk scores.
///
/// Called only on a cache miss in writable mode. Implementations apply their
/// own timeouts; a slow provider blocks the lookup that called it.
pub trait ReputationProvider: Send + Sync {
    /// Score and category for `ip`.
    fn query(&self, ip: IpAddr) -> Result<Reputation, ProviderError>;
}

/// Source of network ownership data.
pub trait RegistryProvider: Send + Sync {
    /// Every allocation the registry attributes to `ip`, widest to narrowest
    /// or in any other order. An empty list counts as a failed lookup.
    fn query(&self, ip: IpAddr) -> Result<Vec<Registration>, ProviderError>;
}
