//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different identifier kinds
//! (e.g., using a raw URL string where a feed name is expected) and make
//! the code more self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The unique name of a registered feed.
///
/// Immutable after registration; also the partition key for every cached
/// item belonging to the feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedName(pub String);

impl FeedName {
    pub fn new(s: impl Into<String>) -> Self {
        FeedName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FeedName {
    fn from(s: String) -> Self {
        FeedName(s)
    }
}

impl From<&str> for FeedName {
    fn from(s: &str) -> Self {
        FeedName(s.to_string())
    }
}

/// Identity of a single in-flight message instance.
///
/// Every `FeedState` is stamped with a fresh instance id at creation. Two
/// queue messages carrying the same feed name but different instance ids
/// are concurrent duplicates; the id is the tie-breaker that decides which
/// one drops itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    /// Generates a fresh random instance id.
    pub fn new() -> Self {
        InstanceId(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
