//! Identifier and versioning types.
//!
//! This module defines strong types for resource identification (`ResourceId`),
//! claimant identification (`ClaimantId`) and optimistic version stamps (`Version`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for identifier parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseIdError {
    /// The resource id was not a positive integer.
    #[error("Invalid resource ID: {0}")]
    Resource(String),

    /// The claimant id was empty.
    #[error("Invalid claimant ID: {0}")]
    Claimant(String),
}

/// Stable identifier of a countable resource.
///
/// Assigned by the store when the resource is created and never reused.
/// Backed by an `i64` so it maps directly onto a `BIGSERIAL` column.
///
/// # Examples
///
/// ```
/// use seatguard_core::ids::ResourceId;
///
/// let id = ResourceId::new(7);
/// assert_eq!(id.value(), 7);
///
/// let parsed: ResourceId = "42".parse().unwrap();
/// assert_eq!(parsed, ResourceId::new(42));
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(i64);

impl ResourceId {
    /// Create a new `ResourceId`.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Key used when this resource is protected by a distributed lease.
    ///
    /// ```
    /// use seatguard_core::ids::ResourceId;
    ///
    /// assert_eq!(ResourceId::new(3).lock_key(), "resource-lock:3");
    /// ```
    #[must_use]
    pub fn lock_key(self) -> String {
        format!("resource-lock:{}", self.0)
    }

    /// Partition this resource maps to when requests are buffered.
    ///
    /// Stable for a given partition count, so every request for one resource
    /// lands on the same partition and is consumed in arrival order.
    ///
    /// ```
    /// use seatguard_core::ids::ResourceId;
    ///
    /// let id = ResourceId::new(10);
    /// assert_eq!(id.partition(4), id.partition(4));
    /// assert!(id.partition(4) < 4);
    /// ```
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // rem_euclid result is in 0..partitions
    pub const fn partition(self, partitions: u32) -> u32 {
        if partitions == 0 {
            return 0;
        }
        self.0.rem_euclid(partitions as i64) as u32
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<i64>() {
            Ok(value) if value > 0 => Ok(Self(value)),
            _ => Err(ParseIdError::Resource(s.to_string())),
        }
    }
}

impl From<i64> for ResourceId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Identifier of whoever is claiming a resource.
///
/// Opaque to the engine; used for duplicate detection only.
///
/// # Validation
///
/// - `FromStr::from_str()` rejects empty strings (use for external input)
/// - `new()` and `From` do not validate (use for application-controlled data)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClaimantId(String);

impl ClaimantId {
    /// Create a new `ClaimantId`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the claimant id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert into the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ClaimantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClaimantId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseIdError::Claimant("Claimant ID cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for ClaimantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClaimantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ClaimantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Version stamp for optimistic concurrency control.
///
/// Starts at 0 when a resource is created and increments by exactly one per
/// successful decrement. A conditional update names the version it read; if the
/// stored version moved in the meantime the update is rejected.
///
/// # Examples
///
/// ```
/// use seatguard_core::ids::Version;
///
/// let v0 = Version::INITIAL;
/// assert_eq!(v0.next(), Version::new(1));
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version of a freshly created resource.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}
