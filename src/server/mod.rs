//! HTTP control surface.
//!
//! - `POST /api/feeds` — register a feed (validates the first page, then
//!   injects a purge message that cascades into registration)
//! - `GET /api/status` — non-destructive peek of every queue
//! - `GET /health` — liveness
//!
//! The public read API that re-serves cached pages lives elsewhere; this
//! surface only controls and observes the lifecycle engine.

use std::sync::Arc;

use crate::lifecycle::LifecycleContext;

pub mod health;
pub mod register;
pub mod status;

pub use health::health_handler;
pub use register::register_handler;
pub use status::status_handler;

/// Shared application state, passed to handlers via Axum's `State`.
#[derive(Clone)]
pub struct AppState {
    ctx: Arc<LifecycleContext>,
}

impl AppState {
    pub fn new(ctx: Arc<LifecycleContext>) -> Self {
        AppState { ctx }
    }

    pub fn ctx(&self) -> &LifecycleContext {
        &self.ctx
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/api/feeds", post(register_handler))
        .route("/api/status", get(status_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
