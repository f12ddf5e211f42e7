pub mod api;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Full application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api::router(state))
        .layer(TraceLayer::new_for_http())
}
