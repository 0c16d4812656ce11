//! API routes.

pub mod health;
pub mod jobs;
pub mod nodes;
pub mod stats;

use axum::Router;

use crate::AppState;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/nodes", nodes::router())
        .merge(stats::router())
}
