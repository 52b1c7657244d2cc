pub mod retrieve;
pub mod sources;
pub mod tasks;
pub mod upload;

use axum::Router;
use std::sync::Arc;

use crate::app::AppState;

/// Build all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(upload::routes())
        .merge(tasks::routes())
        .merge(sources::routes())
        .merge(retrieve::routes())
        .with_state(state)
}
