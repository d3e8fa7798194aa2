//! The RPDE page wire format and its validation rules.
//!
//! An origin page is `{ next, items, license }`. A page is only accepted
//! when the license matches the open CC-BY 4.0 license, the `next` link is
//! present, and the items list is present (possibly empty). Anything else
//! is an invalid page and goes through the error classifier.
//!
//! Item identifiers in the wild are loosely typed: some origins emit
//! integers, others strings. The tagged [`ItemId`] union resolves that
//! exactly once, at ingestion, into a canonical string key; nothing past
//! this boundary ever sees a dynamically-typed value.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The license string every proxied feed must carry.
pub const CC_BY_LICENSE: &str = "https://creativecommons.org/licenses/by/4.0/";

/// Width of the zero-padded canonical form of numeric item ids.
///
/// Padding to a fixed width keeps lexical order consistent with numeric
/// order, which the cursor-paginated read path relies on.
const NUMERIC_ID_WIDTH: usize = 20;

/// A source item identifier: numeric or textual, as published by the origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    Numeric(i64),
    Text(String),
}

impl ItemId {
    /// Resolves the id into its canonical string key.
    ///
    /// Numeric ids are zero-padded to a fixed width; text ids are
    /// percent-encoded so the result is always safe to embed in cursor
    /// URLs and cannot collide with reserved ids.
    pub fn canonical(&self) -> String {
        match self {
            ItemId::Numeric(n) => format!("{:0width$}", n, width = NUMERIC_ID_WIDTH),
            ItemId::Text(s) => url::form_urlencoded::byte_serialize(s.as_bytes()).collect(),
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Numeric(n) => write!(f, "{}", n),
            ItemId::Text(s) => write!(f, "{}", s),
        }
    }
}

/// The RPDE item state field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Updated,
    Deleted,
    /// Any state string this crate does not recognize. Treated as updated.
    #[serde(other)]
    Unknown,
}

impl ItemState {
    pub fn is_deleted(&self) -> bool {
        matches!(self, ItemState::Deleted)
    }
}

/// One item on an origin page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpdeItem {
    pub id: ItemId,
    pub modified: i64,
    #[serde(default)]
    pub kind: String,
    pub state: ItemState,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A validated origin page.
#[derive(Debug, Clone, PartialEq)]
pub struct RpdePage {
    pub next: String,
    pub items: Vec<RpdeItem>,
    pub license: String,
}

/// Reasons a fetched body fails page validation.
#[derive(Debug, Error)]
pub enum PageError {
    /// Body was not parseable as an RPDE page at all.
    #[error("malformed page body: {0}")]
    Malformed(String),

    /// License field missing or not the open license.
    #[error("missing or incorrect license (found {found:?})")]
    LicenseMismatch { found: Option<String> },

    /// The `next` link is required on every page, including the last.
    #[error("page is missing the next link")]
    MissingNext,

    /// The items list is required on every page, even when empty.
    #[error("page is missing the items list")]
    MissingItems,
}

/// Raw deserialization target before validation.
///
/// Every field is optional at the wire level so that validation can report
/// which requirement was violated, rather than a generic parse failure.
#[derive(Debug, Deserialize)]
struct RawPage {
    next: Option<String>,
    items: Option<Vec<RpdeItem>>,
    license: Option<String>,
}

impl RpdePage {
    /// Parses and validates a fetched page body.
    pub fn parse(body: &[u8]) -> Result<RpdePage, PageError> {
        let raw: RawPage =
            serde_json::from_slice(body).map_err(|e| PageError::Malformed(e.to_string()))?;

        match raw.license.as_deref() {
            Some(CC_BY_LICENSE) => {}
            found => {
                return Err(PageError::LicenseMismatch {
                    found: found.map(str::to_owned),
                })
            }
        }

        let next = raw.next.ok_or(PageError::MissingNext)?;
        let items = raw.items.ok_or(PageError::MissingItems)?;

        Ok(RpdePage {
            next,
            items,
            // Validated above to be the open license.
            license: CC_BY_LICENSE.to_string(),
        })
    }
}
