use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, HttpBody},
    extract::{ConnectInfo, FromRequestParts, MatchedPath, RawPathParams, Request, State},
    middleware::Next,
    response::Response,
};

use super::{CorrelationContext, InboundRequest, OutboundResponse};
use crate::logging::Level;
use crate::AppState;

/// Largest response body copied into the response snapshot.
pub const MAX_BODY_SNAPSHOT: usize = 256 * 1024;

/// Middleware that opens a correlation context for each request.
///
/// The context is inserted into request extensions for handlers, a
/// "request received" event is logged while the call is open, and a
/// "request completed" event after the response is attached. Install with
/// `route_layer` so the matched route is known.
pub async fn correlate(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let (mut parts, body) = request.into_parts();

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let mut inbound = InboundRequest::from_parts(&parts, peer);
    inbound.endpoint = parts
        .extensions
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string());
    match RawPathParams::from_request_parts(&mut parts, &()).await {
        Ok(params) => {
            inbound.view_args = params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
        }
        Err(rejection) => inbound.routing_error = Some(rejection.to_string()),
    }

    let method = inbound.method.clone();
    let path = parts.uri.path().to_string();
    let context = Arc::new(CorrelationContext::new(inbound));
    parts.extensions.insert(context.clone());

    state.request_log.log_in(
        &context,
        Level::Info,
        format_args!("{} {} received", method, path),
    );

    let response = next.run(Request::from_parts(parts, body)).await;

    let (parts, body) = response.into_parts();
    let (body, summary) = capture_body(body).await;
    let status = parts.status;
    context.complete(OutboundResponse::from_parts(&parts, summary));

    state.request_log.log_in(
        &context,
        Level::Info,
        format_args!(
            "{} {} completed with {} in {}ms",
            method,
            path,
            status.as_u16(),
            start.elapsed().as_millis()
        ),
    );

    Response::from_parts(parts, body)
}

/// Buffer small, fully-sized bodies so they can be recorded; anything else
/// is passed through untouched.
async fn capture_body(body: Body) -> (Body, String) {
    match body.size_hint().exact() {
        Some(len) if len as usize <= MAX_BODY_SNAPSHOT => {
            match axum::body::to_bytes(body, MAX_BODY_SNAPSHOT).await {
                Ok(bytes) => {
                    let summary = String::from_utf8_lossy(&bytes).into_owned();
                    (Body::from(bytes), summary)
                }
                Err(e) => {
                    tracing::warn!("Failed to buffer response body: {}", e);
                    (Body::empty(), "<unreadable>".to_string())
                }
            }
        }
        Some(len) => (body, format!("<{len} bytes>")),
        None => (body, "<streamed>".to_string()),
    }
}
