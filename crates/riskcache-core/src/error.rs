//! Error types for the IP-risk cache.
use thiserror::Error;

use crate::types::NetworkRange;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("unparseable address: {0:?}")] InvalidAddress(String),
    #[error("unparseable range: {0:?}")] InvalidRange(String),
    #[error("prefix length {prefix} exceeds {max}")] PrefixTooLong { prefix: u8, max: u8 },
    #[error("range {0} has host bits set")] NonCanonical(String),
    #[error("invalid key length: {0}")] InvalidKeyLength(usize),
    #[error("unknown address family tag: {0}")] UnknownFamily(u8),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")] Unavailable(String),
    #[error("malformed provider response: {0}")] Malformed(String),
    #[error("no registry allocation for {0}")] NoAllocation(String),
    #[error("no providers configured")] NotConfigured,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("range {candidate} overlaps stored range {existing}")] Overlap { candidate: NetworkRange, existing: NetworkRange },
    #[error("range {0} is not stored")] NotFound(NetworkRange),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable at {path}: {reason}")] Unavailable { path: String, reason: String },
    #[error("encoding: {0}")] Encoding(String),
    #[error("decoding: {0}")] Decoding(String),
    #[error("backend: {0}")] Backend(String),
    #[error("store opened read-only")] ReadOnly,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("ranges out of order: {prev} before {next}")] Unordered { prev: NetworkRange, next: NetworkRange },
    #[error("ranges overlap: {a} and {b}")] Overlap { a: NetworkRange, b: NetworkRange },
    #[error("gap between {after} and {next}")] Gap { after: NetworkRange, next: NetworkRange },
    #[error("{range} lies outside parent {parent}")] OutsideParent { range: NetworkRange, parent: NetworkRange },
    #[error("members do not reach the start of {0}")] StartUncovered(NetworkRange),
    #[error("members do not reach the end of {0}")] EndUncovered(NetworkRange),
    #[error("family of {0} has no members")] Empty(NetworkRange),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid address: {0}")] InvalidAddress(#[from] AddressError),
    #[error("provider unavailable: {0}")] ProviderUnavailable(#[from] ProviderError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Index(#[from] IndexError),
    #[error("cache is read-only")] ReadOnly,
}

impl CacheError {
    /// Whether the error only affects the current lookup and the caller may
    /// move on to the next address.
    pub fn is_lookup_local(&self) -> bool {
        matches!(self, Self::InvalidAddress(_) | Self::ProviderUnavailable(_) | Self::Index(_))
    }
}
