//! Feed registration endpoint.
//!
//! Validates the candidate's first page up front so callers get an
//! immediate verdict, then injects a purge message for the feed. Purging
//! before registering clears any items a previous life of the feed left
//! behind; the purge worker hands off to the registration worker, which
//! re-validates under the queue's concurrency guards.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::feed::{FeedState, PageError, RpdePage};
use crate::fetch::FeedFetcher;
use crate::queue::{DelayQueue, QueueName};
use crate::types::FeedName;

use super::AppState;

/// Registration request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub dataset_url: Option<String>,
    pub deleted_item_days_to_live: Option<i64>,
}

/// Descriptor returned for a registered (or already-registered) feed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    #[serde(rename = "@context")]
    pub context: &'static str,
    #[serde(rename = "@type")]
    pub kind: &'static str,
    pub name: String,
    pub url: String,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
}

/// Errors surfaced to registration callers.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Please pass a JSON object containing name and url")]
    MissingFields,

    #[error("Registration error while validating first page. Error retrieving '{url}'. {message}")]
    FirstPageUnavailable { url: String, message: String },

    #[error("Registration error while validating first page. Invalid RPDE feed supplied: {0}")]
    InvalidFeed(PageError),

    #[error("Conflicting feed already registered with same name '{name}' using different url '{existing_url}'.")]
    NameConflict { name: String, existing_url: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for RegistrationError {
    fn into_response(self) -> Response {
        let status = match &self {
            RegistrationError::MissingFields => StatusCode::BAD_REQUEST,
            RegistrationError::FirstPageUnavailable { .. }
            | RegistrationError::InvalidFeed(_)
            | RegistrationError::NameConflict { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RegistrationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "message": self.to_string() }))).into_response()
    }
}

pub async fn register_handler(
    State(app_state): State<AppState>,
    Json(request): Json<RegistrationRequest>,
) -> Result<Json<RegistrationResponse>, RegistrationError> {
    let ctx = app_state.ctx();
    let (name, url) = match (request.name, request.url) {
        (Some(name), Some(url)) => (name, url),
        _ => return Err(RegistrationError::MissingFields),
    };

    // Validate the first page before touching any queue, so the caller
    // learns immediately whether the feed is usable.
    let fetched = ctx.fetcher.fetch_page(&url).await.map_err(|e| {
        RegistrationError::FirstPageUnavailable {
            url: url.clone(),
            message: e.to_string(),
        }
    })?;
    if fetched.status == 401 {
        return Err(RegistrationError::FirstPageUnavailable {
            url,
            message: "origin returned 401".to_string(),
        });
    }
    RpdePage::parse(&fetched.body).map_err(RegistrationError::InvalidFeed)?;

    // An in-flight feed with this name either makes this a no-op (same
    // URL) or a rejected conflict (different URL).
    let feed_name = FeedName::new(&name);
    let mut existing: Option<FeedState> = None;
    for queue in QueueName::all() {
        let peeked = ctx
            .queue
            .peek_all(queue)
            .await
            .map_err(|e| RegistrationError::Internal(e.to_string()))?;
        if let Some(state) = peeked.into_iter().find(|s| s.name == feed_name) {
            existing = Some(state);
            break;
        }
    }

    let (date_created, date_modified) = match existing {
        Some(state) if state.source_url != url => {
            return Err(RegistrationError::NameConflict {
                name,
                existing_url: state.source_url,
            });
        }
        Some(state) => {
            // Already registered with the same URL: harmless no-op.
            info!(feed = %feed_name, "feed already registered; returning existing descriptor");
            (state.created_at, state.modified_at)
        }
        None => {
            let state = FeedState::new(
                feed_name.clone(),
                url.clone(),
                request.dataset_url,
                request
                    .deleted_item_days_to_live
                    .unwrap_or(ctx.config.default_deleted_item_retention_days),
            );
            let stamps = (state.created_at, state.modified_at);
            // Purge-before-register: clears anything a previous life of
            // this feed left in the store.
            ctx.queue
                .enqueue(QueueName::Purge, state, Duration::ZERO)
                .await
                .map_err(|e| RegistrationError::Internal(e.to_string()))?;
            info!(feed = %feed_name, url = %url, "registration accepted");
            stamps
        }
    };

    Ok(Json(RegistrationResponse {
        context: "https://schema.org/",
        kind: "DataFeed",
        name: name.clone(),
        url: ctx.config.feed_url(&name),
        date_created,
        date_modified,
    }))
}
