//! Endpoint identifiers
//!
//! Endpoints are the parties the kernel brokers between: vats (`v1`, `v2`, ...)
//! and remote connections (`r1`, `r2`, ...). Identifiers are allocated from
//! monotonically increasing counters owned by the kernel store and are never
//! reused within a kernel lifetime.

use crate::RefParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier for a vat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct VatId(u64);

impl VatId {
    /// Creates a vat ID from its allocation number
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    /// Returns the allocation number
    pub fn index(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for VatId {
    type Err = RefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_tagged(s, "v").map(Self)
    }
}

/// Identifier for a remote connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RemoteId(u64);

impl RemoteId {
    /// Creates a remote ID from its allocation number
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    /// Returns the allocation number
    pub fn index(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl FromStr for RemoteId {
    type Err = RefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_tagged(s, "r").map(Self)
    }
}

/// Any party that owns a c-list: a vat or a remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EndpointId {
    Vat(VatId),
    Remote(RemoteId),
}

impl EndpointId {
    /// Returns the vat ID if this endpoint is a vat
    pub fn as_vat(&self) -> Option<VatId> {
        match self {
            EndpointId::Vat(vat) => Some(*vat),
            EndpointId::Remote(_) => None,
        }
    }
}

impl From<VatId> for EndpointId {
    fn from(vat: VatId) -> Self {
        EndpointId::Vat(vat)
    }
}

impl From<RemoteId> for EndpointId {
    fn from(remote: RemoteId) -> Self {
        EndpointId::Remote(remote)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointId::Vat(vat) => vat.fmt(f),
            EndpointId::Remote(remote) => remote.fmt(f),
        }
    }
}

impl FromStr for EndpointId {
    type Err = RefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('v') {
            s.parse().map(EndpointId::Vat)
        } else if s.starts_with('r') {
            s.parse().map(EndpointId::Remote)
        } else {
            Err(RefParseError::UnknownTag(s.to_string()))
        }
    }
}

macro_rules! string_conversions {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for String {
                fn from(value: $ty) -> Self {
                    value.to_string()
                }
            }

            impl TryFrom<String> for $ty {
                type Error = RefParseError;

                fn try_from(value: String) -> Result<Self, Self::Error> {
                    value.parse()
                }
            }
        )*
    };
}

string_conversions!(VatId, RemoteId, EndpointId);

/// Parses `<tag><n>` where `n` is a positive decimal number.
pub(crate) fn parse_tagged(s: &str, tag: &str) -> Result<u64, RefParseError> {
    let digits = s
        .strip_prefix(tag)
        .ok_or_else(|| RefParseError::UnknownTag(s.to_string()))?;
    parse_index(s, digits)
}

pub(crate) fn parse_index(whole: &str, digits: &str) -> Result<u64, RefParseError> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RefParseError::BadIndex(whole.to_string()));
    }
    digits
        .parse()
        .map_err(|_| RefParseError::BadIndex(whole.to_string()))
}
