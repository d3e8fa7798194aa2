//! Feed domain model: the RPDE page format and the per-feed lifecycle state.

pub mod page;
pub mod state;

pub use page::{ItemId, ItemState, PageError, RpdeItem, RpdePage, CC_BY_LICENSE};
pub use state::{ErrorCategory, FeedState, RetryState};
