//! Version identifiers: the engine's single global, monotonically
//! increasing counter, plus the 128-bit replication-era tag used by
//! alignment payloads.
//!
//! Unlike systems that version per-entity, this engine assigns one commit
//! version per committed transaction and publishes it everywhere that
//! transaction wrote. `0` is reserved to mean "not yet committed".

use serde::{Deserialize, Serialize};
use std::fmt;

/// A commit or read version. Totally ordered; `0` means "no commit yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version before any transaction has committed.
    pub const NONE: Version = Version(0);

    /// Wrap a raw version number.
    pub const fn new(raw: u64) -> Self {
        Version(raw)
    }

    /// The raw version number.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// `true` if no commit has been assigned yet.
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// The next version after this one.
    pub const fn next(self) -> Version {
        Version(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(raw: u64) -> Self {
        Version(raw)
    }
}

/// A 128-bit identity tagging a replication era. Paired with a [`Version`]
/// in a global version vector; two terms are never compared to each other,
/// only used to disambiguate which era a version belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalTerm(u128);

impl GlobalTerm {
    /// Wrap a raw 128-bit term identity.
    pub const fn new(raw: u128) -> Self {
        GlobalTerm(raw)
    }

    /// The raw 128-bit value.
    pub const fn as_u128(self) -> u128 {
        self.0
    }
}

/// One entry of a global version vector: the highest version seen for a
/// given replication era.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalVersion {
    /// The replication era this version belongs to.
    pub term: GlobalTerm,
    /// The highest version observed within that era.
    pub version: Version,
}

impl GlobalVersion {
    /// Build a global version entry.
    pub const fn new(term: GlobalTerm, version: Version) -> Self {
        GlobalVersion { term, version }
    }
}
