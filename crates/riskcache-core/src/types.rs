//! Core cache types: network ranges, risk records, provider payloads.
//!
//! A [`NetworkRange`] is always held in canonical form (host bits zero), so
//! two ranges covering the same addresses compare equal. Ranges order by
//! `(first address, prefix length)`; every IPv4 range sorts before every
//! IPv6 range.

use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{KEY_TAG_V4, KEY_TAG_V6};
use crate::error::AddressError;

/// Address family of a range or address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddrFamily {
    V4,
    V6,
}

impl AddrFamily {
    /// Family of the given address.
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    /// Address width in bits.
    pub fn bits(self) -> u8 {
        match self {
            Self::V4 => 32,
            Self::V6 => 128,
        }
    }

    /// Leading byte of the store key.
    pub fn key_tag(self) -> u8 {
        match self {
            Self::V4 => KEY_TAG_V4,
            Self::V6 => KEY_TAG_V6,
        }
    }

    fn from_key_tag(tag: u8) -> Result<Self, AddressError> {
        match tag {
            KEY_TAG_V4 => Ok(Self::V4),
            KEY_TAG_V6 => Ok(Self::V6),
            other => Err(AddressError::UnknownFamily(other)),
        }
    }
}

/// Numeric value of an address within its family.
pub fn addr_to_bits(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(a) => u32::from(a) as u128,
        IpAddr::V6(a) => u128::from(a),
    }
}

/// Address with the given numeric value. IPv4 values are truncated to 32 bits.
pub fn bits_to_addr(family: AddrFamily, bits: u128) -> IpAddr {
    match family {
        AddrFamily::V4 => IpAddr::V4(Ipv4Addr::from(bits as u32)),
        AddrFamily::V6 => IpAddr::V6(Ipv6Addr::from(bits)),
    }
}

/// Mask of the low `host_bits` bits.
pub(crate) fn host_mask(host_bits: u8) -> u128 {
    if host_bits >= 128 {
        u128::MAX
    } else {
        (1u128 << host_bits) - 1
    }
}

/// Parse an address exactly as written. Surrounding whitespace is rejected.
pub fn parse_address(s: &str) -> Result<IpAddr, AddressError> {
    s.parse::<IpAddr>()
        .map_err(|_| AddressError::InvalidAddress(s.to_string()))
}

/// A CIDR block: base address plus prefix length.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkRange(IpNet);

impl NetworkRange {
    /// Build a range from any address inside it. Host bits are cleared.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self, AddressError> {
        let max = AddrFamily::of(&addr).bits();
        let net = IpNet::new(addr, prefix_len)
            .map_err(|_| AddressError::PrefixTooLong { prefix: prefix_len, max })?;
        Ok(Self(net.trunc()))
    }

    /// Build a range whose base address must already be canonical.
    pub fn new_exact(addr: IpAddr, prefix_len: u8) -> Result<Self, AddressError> {
        let range = Self::new(addr, prefix_len)?;
        if range.network() != addr {
            return Err(AddressError::NonCanonical(format!("{addr}/{prefix_len}")));
        }
        Ok(range)
    }

    /// Single-address range (`/32` or `/128`).
    pub fn host(addr: IpAddr) -> Self {
        Self(IpNet::from(addr))
    }

    /// Range starting at numeric address `first` with the given prefix.
    ///
    /// `first` must be aligned to the prefix; callers in this crate guarantee it.
    pub(crate) fn from_bits(family: AddrFamily, first: u128, prefix_len: u8) -> Self {
        let addr = bits_to_addr(family, first);
        // Prefix lengths come from `family.bits()` arithmetic and never exceed it.
        Self(IpNet::new(addr, prefix_len).map(|n| n.trunc()).unwrap_or_else(|_| IpNet::from(addr)))
    }

    pub fn family(&self) -> AddrFamily {
        match self.0 {
            IpNet::V4(_) => AddrFamily::V4,
            IpNet::V6(_) => AddrFamily::V6,
        }
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    /// Base address of the block.
    pub fn network(&self) -> IpAddr {
        self.0.network()
    }

    /// First address covered.
    pub fn first(&self) -> IpAddr {
        self.0.network()
    }

    /// Last address covered.
    pub fn last(&self) -> IpAddr {
        self.0.broadcast()
    }

    /// Numeric `(first, last)` interval within the range's family.
    pub fn bounds(&self) -> (u128, u128) {
        let first = addr_to_bits(self.first());
        let host_bits = self.family().bits() - self.prefix_len();
        (first, first | host_mask(host_bits))
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.0.contains(addr)
    }

    /// Whether every address of `other` is also in `self`.
    pub fn contains_range(&self, other: &NetworkRange) -> bool {
        self.family() == other.family()
            && self.prefix_len() <= other.prefix_len()
            && self.contains(&other.first())
    }

    pub fn overlaps(&self, other: &NetworkRange) -> bool {
        self.contains_range(other) || other.contains_range(self)
    }

    /// Subset of `other` and not equal to it.
    pub fn is_proper_subset_of(&self, other: &NetworkRange) -> bool {
        self != other && other.contains_range(self)
    }

    /// The two halves of this block, or `None` for a single address.
    pub fn halves(&self) -> Option<(NetworkRange, NetworkRange)> {
        let family = self.family();
        let prefix = self.prefix_len();
        if prefix >= family.bits() {
            return None;
        }
        let (first, _) = self.bounds();
        let child = prefix + 1;
        let upper = first | (1u128 << (family.bits() - child));
        Some((
            Self::from_bits(family, first, child),
            Self::from_bits(family, upper, child),
        ))
    }

    pub fn as_ipnet(&self) -> IpNet {
        self.0
    }

    /// Canonical store key: family tag, address octets, prefix length.
    pub fn to_key_bytes(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(18);
        key.push(self.family().key_tag());
        match self.network() {
            IpAddr::V4(a) => key.extend_from_slice(&a.octets()),
            IpAddr::V6(a) => key.extend_from_slice(&a.octets()),
        }
        key.push(self.prefix_len());
        key
    }

    /// Inverse of [`to_key_bytes`](Self::to_key_bytes). Rejects non-canonical keys.
    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        let (&tag, rest) = bytes
            .split_first()
            .ok_or(AddressError::InvalidKeyLength(0))?;
        let family = AddrFamily::from_key_tag(tag)?;
        let addr_len = usize::from(family.bits() / 8);
        if rest.len() != addr_len + 1 {
            return Err(AddressError::InvalidKeyLength(bytes.len()));
        }
        let prefix = rest[addr_len];
        let addr = match family {
            AddrFamily::V4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&rest[..addr_len]);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            AddrFamily::V6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&rest[..addr_len]);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
        };
        Self::new_exact(addr, prefix)
    }
}

impl Ord for NetworkRange {
    fn cmp(&self, other: &Self) -> Ordering {
        self.first()
            .cmp(&other.first())
            .then_with(|| self.prefix_len().cmp(&other.prefix_len()))
    }
}

impl PartialOrd for NetworkRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NetworkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix_len())
    }
}

impl fmt::Debug for NetworkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkRange({self})")
    }
}

impl FromStr for NetworkRange {
    type Err = AddressError;

    /// Parses `"base/len"` strictly (host bits must be zero). A bare address
    /// parses as a host range.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((base, len)) => {
                let addr = base
                    .parse::<IpAddr>()
                    .map_err(|_| AddressError::InvalidRange(s.to_string()))?;
                let prefix = len
                    .parse::<u8>()
                    .map_err(|_| AddressError::InvalidRange(s.to_string()))?;
                Self::new_exact(addr, prefix)
            }
            None => parse_address(s).map(Self::host),
        }
    }
}

impl From<IpNet> for NetworkRange {
    fn from(net: IpNet) -> Self {
        Self(net.trunc())
    }
}

impl Serialize for NetworkRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NetworkRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Open mode of a cache, fixed for the lifetime of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    /// Lookups only. Never contacts providers, never writes the store.
    #[default]
    ReadOnly,
    /// Misses are resolved through the providers and inserted in memory.
    Writable,
}

impl AccessMode {
    pub fn is_writable(self) -> bool {
        self == Self::Writable
    }
}

/// Reputation provider output for one address.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Reputation {
    /// Numeric risk score.
    pub score: f64,
    /// Categorical label, e.g. "low" or "high".
    pub category: String,
    /// Free-text explanation, when the provider supplies one.
    pub comment: Option<String>,
}

/// One network allocation reported by the registry provider.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub range: NetworkRange,
    pub organization: Option<String>,
    pub handle: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    /// ISO 3166-2 subdivision.
    pub state: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    /// Street-address lines, in registry order.
    pub address: Vec<String>,
    pub asn: Option<u32>,
}

impl Registration {
    /// Registration with only the range set.
    pub fn bare(range: NetworkRange) -> Self {
        Self {
            range,
            organization: None,
            handle: None,
            country: None,
            country_code: None,
            state: None,
            city: None,
            postal_code: None,
            address: Vec::new(),
            asn: None,
        }
    }
}

/// Reputation and registry metadata attributed to a network range.
///
/// Immutable once stored: a later lookup may attribute a narrower range to a
/// new record, but never rewrites this one.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq,
    bincode::Encode, bincode::Decode,
)]
pub struct RiskRecord {
    pub organization: Option<String>,
    pub handle: Option<String>,
    pub score: f64,
    pub category: String,
    pub comment: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub address: Vec<String>,
    pub asn: Option<u32>,
    /// Unix seconds at which the record was resolved.
    pub timestamp: i64,
}

impl RiskRecord {
    /// Merge one registry allocation with the reputation of the queried address.
    pub fn from_lookup(registration: &Registration, reputation: &Reputation, timestamp: i64) -> Self {
        Self {
            organization: registration.organization.clone(),
            handle: registration.handle.clone(),
            score: reputation.score,
            category: reputation.category.clone(),
            comment: reputation.comment.clone(),
            country: registration.country.clone(),
            country_code: registration.country_code.clone(),
            state: registration.state.clone(),
            city: registration.city.clone(),
            postal_code: registration.postal_code.clone(),
            address: registration.address.clone(),
            asn: registration.asn,
            timestamp,
        }
    }

    /// Record carrying only a score and category.
    pub fn scored(score: f64, category: impl Into<String>) -> Self {
        Self {
            organization: None,
            handle: None,
            score,
            category: category.into(),
            comment: None,
            country: None,
            country_code: None,
            state: None,
            city: None,
            postal_code: None,
            address: Vec::new(),
            asn: None,
            timestamp: 0,
        }
    }

    /// Whether two records carry the same risk score.
    pub fn same_score(&self, other: &RiskRecord) -> bool {
        self.score == other.score
    }

    /// Resolution time as a UTC datetime.
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}
