//! Queue introspection endpoint.
//!
//! Peeks every queue non-destructively and reports each in-flight message
//! with the queue it currently sits on. This is the only surface that
//! exposes internal retry/error state.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feed::FeedState;
use crate::queue::{DelayQueue, QueueName};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    /// Restrict the report to one feed name.
    pub name: Option<String>,
}

/// One in-flight message as reported by the status surface.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatus {
    pub queue: &'static str,
    pub feed_state: FeedState,
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("queue peek failed: {0}")]
    Peek(String),
}

impl IntoResponse for StatusError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

pub async fn status_handler(
    State(app_state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Vec<MessageStatus>>, StatusError> {
    let ctx = app_state.ctx();

    let mut list = Vec::new();
    for queue in QueueName::all() {
        let peeked = ctx
            .queue
            .peek_all(queue)
            .await
            .map_err(|e| StatusError::Peek(e.to_string()))?;
        list.extend(peeked.into_iter().map(|feed_state| MessageStatus {
            queue: queue.as_str(),
            feed_state,
        }));
    }

    if let Some(name) = &query.name {
        list.retain(|m| m.feed_state.name.as_str() == name);
    }
    list.sort_by(|a, b| a.feed_state.name.cmp(&b.feed_state.name));

    Ok(Json(list))
}
