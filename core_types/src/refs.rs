//! Kernel and endpoint references
//!
//! A [`KRef`] names a kernel object (`ko<n>`) or kernel promise (`kp<n>`) and is
//! globally unique. An [`ERef`] is scoped to one endpoint's c-list and carries
//! a direction sign: `o+3` is something the endpoint exports (owns), `o-3` is
//! something it imports from elsewhere. The same ERef text means different
//! things on different endpoints.

use crate::ids::parse_index;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing identifier or reference text
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefParseError {
    #[error("unrecognized reference {0}")]
    UnknownTag(String),

    #[error("reference {0} has an invalid index")]
    BadIndex(String),

    #[error("reference {0} is missing a direction sign")]
    MissingDirection(String),
}

/// Object or promise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RefKind {
    Object,
    Promise,
}

impl RefKind {
    fn letter(&self) -> char {
        match self {
            RefKind::Object => 'o',
            RefKind::Promise => 'p',
        }
    }

    fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'o' => Some(RefKind::Object),
            'p' => Some(RefKind::Promise),
            _ => None,
        }
    }
}

/// Which side of the c-list owns an endpoint reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// `+`: the endpoint is the exporter
    Export,
    /// `-`: the endpoint holds an import
    Import,
}

impl Direction {
    fn sign(&self) -> char {
        match self {
            Direction::Export => '+',
            Direction::Import => '-',
        }
    }
}

/// Kernel-level reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct KRef {
    kind: RefKind,
    index: u64,
}

impl KRef {
    /// Kernel object reference `ko<index>`
    pub fn object(index: u64) -> Self {
        Self {
            kind: RefKind::Object,
            index,
        }
    }

    /// Kernel promise reference `kp<index>`
    pub fn promise(index: u64) -> Self {
        Self {
            kind: RefKind::Promise,
            index,
        }
    }

    pub fn kind(&self) -> RefKind {
        self.kind
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn is_promise(&self) -> bool {
        self.kind == RefKind::Promise
    }
}

impl fmt::Display for KRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{}{}", self.kind.letter(), self.index)
    }
}

impl FromStr for KRef {
    type Err = RefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('k')
            .ok_or_else(|| RefParseError::UnknownTag(s.to_string()))?;
        let mut chars = rest.chars();
        let kind = chars
            .next()
            .and_then(RefKind::from_letter)
            .ok_or_else(|| RefParseError::UnknownTag(s.to_string()))?;
        let index = parse_index(s, chars.as_str())?;
        Ok(Self { kind, index })
    }
}

/// Endpoint-local reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ERef {
    kind: RefKind,
    direction: Direction,
    index: u64,
}

impl ERef {
    pub fn new(kind: RefKind, direction: Direction, index: u64) -> Self {
        Self {
            kind,
            direction,
            index,
        }
    }

    pub fn kind(&self) -> RefKind {
        self.kind
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn is_promise(&self) -> bool {
        self.kind == RefKind::Promise
    }

    pub fn is_export(&self) -> bool {
        self.direction == Direction::Export
    }

    pub fn is_import(&self) -> bool {
        self.direction == Direction::Import
    }
}

impl fmt::Display for ERef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.kind.letter(),
            self.direction.sign(),
            self.index
        )
    }
}

impl FromStr for ERef {
    type Err = RefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let kind = chars
            .next()
            .and_then(RefKind::from_letter)
            .ok_or_else(|| RefParseError::UnknownTag(s.to_string()))?;
        let direction = match chars.next() {
            Some('+') => Direction::Export,
            Some('-') => Direction::Import,
            _ => return Err(RefParseError::MissingDirection(s.to_string())),
        };
        let index = parse_index(s, chars.as_str())?;
        Ok(Self {
            kind,
            direction,
            index,
        })
    }
}

impl From<KRef> for String {
    fn from(kref: KRef) -> Self {
        kref.to_string()
    }
}

impl TryFrom<String> for KRef {
    type Error = RefParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ERef> for String {
    fn from(eref: ERef) -> Self {
        eref.to_string()
    }
}

impl TryFrom<String> for ERef {
    type Error = RefParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
