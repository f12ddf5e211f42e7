use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::get,
    Extension, Json, Router,
};
use serde_json::Value;

use crate::correlation::{middleware::correlate, CorrelationContext};
use crate::error::ApiError;
use crate::logging::Level;
use crate::requester::CallOptions;
use crate::AppState;

/// GET /api/*path - forward to the upstream API without exposing the key.
///
/// Only callers on `server.host` are served unless `server.debug` is set.
async fn forward(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<Arc<CorrelationContext>>,
    Path(path): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let server = &state.config.server;
    let peer = context.request().peer_addr.map(|addr| addr.ip().to_string());

    if !server.debug && peer.as_deref() != Some(server.host.as_str()) {
        state.request_log.log_in(
            &context,
            Level::Warning,
            format_args!(
                "Rejected forward of {} from {}",
                path,
                peer.as_deref().unwrap_or("unknown peer")
            ),
        );
        return Err(ApiError::Unauthorized);
    }

    let payload = state
        .forwarder
        .get(&path, CallOptions::new().params(params))
        .await?;

    Ok(Json(payload))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/*path", get(forward))
        .route_layer(middleware::from_fn_with_state(state.clone(), correlate))
        .with_state(state)
}
