//! Shared test fixtures: a programmable fetch collaborator, context
//! builders wiring the in-memory queue and store, and page body builders.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::{ClearCacheFlag, ProxyConfig};
use crate::feed::{FeedState, CC_BY_LICENSE};
use crate::fetch::{FeedFetcher, FetchFailure, FetchedPage, PageSignals};
use crate::lifecycle::LifecycleContext;
use crate::queue::InMemoryDelayQueue;
use crate::store::InMemoryStore;
use crate::types::FeedName;

/// A fetch collaborator that replays scripted responses per URL.
///
/// Responses queue up per URL and are consumed in order; the last response
/// for a URL is sticky, so a test can script "one page, then last page
/// forever" without counting invocations.
#[derive(Default)]
pub struct MockFetcher {
    responses: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
}

type ScriptedResponse = Result<FetchedPage, FetchFailure>;

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the next response for a URL.
    pub fn respond(&self, url: &str, response: ScriptedResponse) {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn respond_page(&self, url: &str, page: FetchedPage) {
        self.respond(url, Ok(page));
    }

    pub fn respond_error(&self, url: &str, error: FetchFailure) {
        self.respond(url, Err(error));
    }
}

#[async_trait]
impl FeedFetcher for MockFetcher {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchFailure> {
        let mut responses = self.responses.lock().unwrap();
        let queue = responses
            .get_mut(url)
            .unwrap_or_else(|| panic!("no scripted response for {}", url));
        let response = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            // Sticky last response.
            queue.front().cloned().unwrap_or_else(|| panic!("no scripted response for {}", url))
        };
        response
    }
}

/// Builds a context over fresh in-memory collaborators.
pub fn test_context() -> (
    LifecycleContext,
    Arc<InMemoryDelayQueue>,
    Arc<InMemoryStore>,
    Arc<MockFetcher>,
) {
    test_context_with(ProxyConfig::default(), ClearCacheFlag::Fixed(false))
}

/// Builds a context with custom config and clear-cache flag.
pub fn test_context_with(
    config: ProxyConfig,
    clear_cache: ClearCacheFlag,
) -> (
    LifecycleContext,
    Arc<InMemoryDelayQueue>,
    Arc<InMemoryStore>,
    Arc<MockFetcher>,
) {
    let queue = Arc::new(InMemoryDelayQueue::new());
    let store = Arc::new(InMemoryStore::new());
    let fetcher = Arc::new(MockFetcher::new());
    let ctx = LifecycleContext {
        queue: queue.clone(),
        store: store.clone(),
        fetcher: fetcher.clone(),
        config,
        clear_cache,
    };
    (ctx, queue, store, fetcher)
}

/// A fresh feed state named `name`, pointing at a conventional test URL.
pub fn test_state(name: &str) -> FeedState {
    FeedState::new(
        FeedName::new(name),
        format!("https://origin.example.org/{}/feed", name),
        None,
        7,
    )
}

/// JSON for one updated item.
pub fn item_json(id: i64, modified: i64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "modified": modified,
        "kind": "Event",
        "state": "updated",
        "data": {"name": format!("event-{}", id)}
    })
}

/// JSON for one deleted item.
pub fn deleted_item_json(id: i64, modified: i64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "modified": modified,
        "kind": "Event",
        "state": "deleted"
    })
}

/// Serialized page body with the open license.
pub fn page_body(next: &str, items: &[serde_json::Value]) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "next": next,
        "items": items,
        "license": CC_BY_LICENSE,
    }))
    .unwrap()
}

/// A 200 response carrying the given page body and no cache signals.
pub fn ok_page(next: &str, items: &[serde_json::Value]) -> FetchedPage {
    FetchedPage {
        status: 200,
        signals: PageSignals::default(),
        body: page_body(next, items),
    }
}

/// A 200 response with explicit cache signals.
pub fn ok_page_with_signals(
    next: &str,
    items: &[serde_json::Value],
    signals: PageSignals,
) -> FetchedPage {
    FetchedPage {
        status: 200,
        signals,
        body: page_body(next, items),
    }
}

/// A response with the given status and an empty body.
pub fn status_page(status: u16) -> FetchedPage {
    FetchedPage {
        status,
        signals: PageSignals::default(),
        body: Vec::new(),
    }
}
