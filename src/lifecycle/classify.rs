//! Error classification and retry policy.
//!
//! Every failure raised during a worker invocation is mapped into a closed
//! set of categories, each with a fixed recovery policy:
//!
//! | category | policy |
//! |---|---|
//! | unauthorized | drop immediately |
//! | duplicate write | drop immediately |
//! | name conflict | drop immediately |
//! | invalid page / fetch error / store write error / unexpected | backoff `2^n` s, dead-letter at 15 consecutive |
//! | store transient overload | fixed retry-after, never dead-letters |
//! | forced cache clear | dead-letter immediately |
//!
//! The consecutive retry count is per-category: it resets to zero whenever
//! the category changes from the previous attempt.

use thiserror::Error;

use crate::config::ProxyConfig;
use crate::feed::{ErrorCategory, PageError, RetryState};
use crate::fetch::FetchFailure;
use crate::store::StoreError;
use crate::types::FeedName;

/// A failure raised somewhere inside a worker invocation.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("origin returned 401 for {url}")]
    Unauthorized { url: String },

    #[error("store reported zero rows affected for a non-empty batch; another delivery already applied this write")]
    DuplicateWrite,

    #[error(transparent)]
    InvalidPage(#[from] PageError),

    #[error(transparent)]
    Fetch(#[from] FetchFailure),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("operator requested a cache clear")]
    ForcedClear,

    #[error("feed '{name}' already in flight with different url '{existing_url}'")]
    NameConflict {
        name: FeedName,
        existing_url: String,
    },

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl FeedError {
    /// Maps the failure into its classification category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            FeedError::Unauthorized { .. } => ErrorCategory::Unauthorized,
            FeedError::DuplicateWrite => ErrorCategory::DuplicateWrite,
            FeedError::InvalidPage(_) => ErrorCategory::InvalidPage,
            FeedError::Fetch(_) => ErrorCategory::FetchError,
            FeedError::Store(StoreError::Transient { .. }) => ErrorCategory::StoreTransient,
            FeedError::Store(StoreError::Backend(_)) => ErrorCategory::StoreWriteError,
            FeedError::ForcedClear => ErrorCategory::ForcedClear,
            FeedError::NameConflict { .. } => ErrorCategory::NameConflict,
            FeedError::Unexpected(_) => ErrorCategory::Unexpected,
        }
    }
}

/// The classifier's verdict: what to do with the failed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    pub category: ErrorCategory,
    /// Consecutive same-category failures, zero-based: the first failure
    /// of a category carries count 0.
    pub retry_count: u32,
    pub delay_seconds: u64,
    pub dead_letter: bool,
    pub drop_immediately: bool,
}

impl RetryDecision {
    /// The retry context to carry in the feed state for the next attempt.
    pub fn to_retry_state(&self) -> RetryState {
        RetryState {
            category: self.category,
            retry_count: self.retry_count,
            delay_seconds: self.delay_seconds,
            dead_letter: self.dead_letter,
            drop_immediately: self.drop_immediately,
        }
    }
}

/// Applies the fixed policy table to a failure.
///
/// `previous` is the retry context from the prior attempt, used to detect
/// category continuation. A feed that reaches the dead-letter threshold is
/// dead-lettered (which triggers a purge) rather than silently dropped, so
/// cached data never outlives an abandoned feed.
pub fn classify(
    error: &FeedError,
    previous: Option<&RetryState>,
    config: &ProxyConfig,
) -> RetryDecision {
    let category = error.category();
    let retry_count = match previous {
        Some(prev) if prev.category == category => prev.retry_count + 1,
        _ => 0,
    };

    let drop = |category| RetryDecision {
        category,
        retry_count,
        delay_seconds: 0,
        dead_letter: false,
        drop_immediately: true,
    };

    match category {
        ErrorCategory::Unauthorized | ErrorCategory::DuplicateWrite | ErrorCategory::NameConflict => {
            drop(category)
        }

        ErrorCategory::ForcedClear => RetryDecision {
            category,
            retry_count,
            delay_seconds: 0,
            dead_letter: true,
            drop_immediately: false,
        },

        ErrorCategory::StoreTransient => RetryDecision {
            category,
            retry_count,
            delay_seconds: config.store_retry_after.as_secs(),
            dead_letter: false,
            drop_immediately: false,
        },

        ErrorCategory::InvalidPage
        | ErrorCategory::FetchError
        | ErrorCategory::StoreWriteError
        | ErrorCategory::Unexpected => {
            let dead_letter = retry_count >= config.dead_letter_threshold;
            RetryDecision {
                category,
                retry_count,
                delay_seconds: backoff_seconds(retry_count),
                dead_letter,
                drop_immediately: false,
            }
        }
    }
}

/// `2^n` seconds, saturating well past any reachable retry count.
fn backoff_seconds(retry_count: u32) -> u64 {
    1u64.checked_shl(retry_count).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> ProxyConfig {
        ProxyConfig::default()
    }

    fn fetch_error() -> FeedError {
        FeedError::Fetch(FetchFailure::Timeout {
            url: "https://example.org/feed".to_string(),
        })
    }

    fn retry_state(category: ErrorCategory, retry_count: u32) -> RetryState {
        RetryState {
            category,
            retry_count,
            delay_seconds: 0,
            dead_letter: false,
            drop_immediately: false,
        }
    }

    #[test]
    fn unauthorized_drops_immediately() {
        let decision = classify(
            &FeedError::Unauthorized {
                url: "https://example.org/feed".to_string(),
            },
            None,
            &config(),
        );
        assert!(decision.drop_immediately);
        assert!(!decision.dead_letter);
    }

    #[test]
    fn duplicate_write_drops_immediately() {
        let decision = classify(&FeedError::DuplicateWrite, None, &config());
        assert!(decision.drop_immediately);
    }

    #[test]
    fn forced_clear_dead_letters_regardless_of_history() {
        let previous = retry_state(ErrorCategory::FetchError, 12);
        let decision = classify(&FeedError::ForcedClear, Some(&previous), &config());
        assert!(decision.dead_letter);
        assert!(!decision.drop_immediately);
    }

    #[test]
    fn first_failure_of_a_category_has_count_zero() {
        let decision = classify(&fetch_error(), None, &config());
        assert_eq!(decision.retry_count, 0);
        assert_eq!(decision.delay_seconds, 1);
        assert!(!decision.dead_letter);
    }

    #[test]
    fn repeated_category_increments_and_doubles_delay() {
        let previous = retry_state(ErrorCategory::FetchError, 2);
        let decision = classify(&fetch_error(), Some(&previous), &config());
        assert_eq!(decision.retry_count, 3);
        assert_eq!(decision.delay_seconds, 8);
    }

    #[test]
    fn category_change_resets_count() {
        // A fetch error streak at count 3, then an invalid page.
        let previous = retry_state(ErrorCategory::FetchError, 3);
        let decision = classify(
            &FeedError::InvalidPage(PageError::MissingNext),
            Some(&previous),
            &config(),
        );
        assert_eq!(decision.category, ErrorCategory::InvalidPage);
        assert_eq!(decision.retry_count, 0);
        assert_eq!(decision.delay_seconds, 1);
    }

    #[test]
    fn sixteenth_consecutive_fetch_error_dead_letters() {
        // Simulate 16 consecutive fetch errors; counts run 0..=15.
        let mut previous: Option<RetryState> = None;
        let mut last = None;
        for _ in 0..16 {
            let decision = classify(&fetch_error(), previous.as_ref(), &config());
            previous = Some(decision.to_retry_state());
            last = Some(decision);
        }
        let last = last.unwrap();
        assert_eq!(last.retry_count, 15);
        assert!(last.dead_letter);

        // The fifteenth (count 14) did not.
        let fifteenth = retry_state(ErrorCategory::FetchError, 13);
        let decision = classify(&fetch_error(), Some(&fifteenth), &config());
        assert_eq!(decision.retry_count, 14);
        assert!(!decision.dead_letter);
    }

    #[test]
    fn store_transient_uses_fixed_delay_and_never_dead_letters() {
        let error = FeedError::Store(StoreError::Transient {
            retry_after_seconds: None,
        });
        let previous = retry_state(ErrorCategory::StoreTransient, 40);
        let decision = classify(&error, Some(&previous), &config());
        assert_eq!(decision.delay_seconds, 10);
        assert!(!decision.dead_letter);
        assert!(!decision.drop_immediately);
    }

    #[test]
    fn store_backend_error_follows_backoff_policy() {
        let error = FeedError::Store(StoreError::Backend("deadlock".to_string()));
        let decision = classify(&error, None, &config());
        assert_eq!(decision.category, ErrorCategory::StoreWriteError);
        assert_eq!(decision.delay_seconds, 1);
    }

    #[test]
    fn unexpected_is_treated_like_a_backoff_category() {
        let error = FeedError::Unexpected("panicked downstream".to_string());
        let previous = retry_state(ErrorCategory::Unexpected, 14);
        let decision = classify(&error, Some(&previous), &config());
        assert_eq!(decision.retry_count, 15);
        assert!(decision.dead_letter);
    }

    #[test]
    fn name_conflict_drops_immediately() {
        let error = FeedError::NameConflict {
            name: FeedName::new("a"),
            existing_url: "https://other.example.org/feed".to_string(),
        };
        let decision = classify(&error, None, &config());
        assert!(decision.drop_immediately);
    }
}
