use serde::Serialize;

use crate::correlation::{CorrelationContext, OutboundResponse};

/// Inbound call metadata persisted alongside a log event.
///
/// Structured fields are pre-serialized JSON text, ready for storage.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSnapshot {
    pub correlation_id: String,
    pub view_args: Option<String>,
    pub routing_exception: Option<String>,
    pub endpoint: Option<String>,
    pub blueprint: Option<String>,
    pub blueprints: Option<String>,
    pub accept_languages: Option<String>,
    pub accept_mimetypes: Option<String>,
    pub access_route: Option<String>,
    pub args: Option<String>,
    pub authorization: Option<String>,
    pub base_url: String,
    pub cookies: Option<String>,
    pub full_path: String,
    pub host: String,
    pub host_url: String,
    pub url: String,
    pub method: String,
    pub headers: Option<String>,
    pub remote_addr: Option<String>,
}

impl RequestSnapshot {
    pub fn capture(context: &CorrelationContext) -> Self {
        let request = context.request();
        let blueprint = request.blueprint();

        Self {
            correlation_id: context.id().to_string(),
            view_args: to_json(&request.view_args),
            routing_exception: request.routing_error.clone(),
            endpoint: request.endpoint.clone(),
            blueprints: blueprint.as_ref().and_then(|b| to_json(&[b])),
            blueprint,
            accept_languages: request.header("accept-language").map(String::from),
            accept_mimetypes: request.header("accept").map(String::from),
            access_route: to_json(&request.access_route()),
            args: to_json(&request.args),
            authorization: request.header("authorization").map(String::from),
            base_url: request.base_url.clone(),
            cookies: to_json(&request.cookies),
            full_path: request.full_path.clone(),
            host: request.host.clone(),
            host_url: request.host_url.clone(),
            url: request.url.clone(),
            method: request.method.clone(),
            headers: to_json(&request.headers),
            remote_addr: request.client_addr(),
        }
    }
}

/// Outbound result persisted alongside a log event.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseSnapshot {
    pub correlation_id: String,
    pub expires: Option<String>,
    pub location: Option<String>,
    pub status: String,
    pub status_code: u16,
    pub headers: Option<String>,
    pub response: String,
}

impl ResponseSnapshot {
    pub fn capture(context: &CorrelationContext, response: &OutboundResponse) -> Self {
        Self {
            correlation_id: context.id().to_string(),
            expires: response.header("expires").map(String::from),
            location: response.header("location").map(String::from),
            status: response.status(),
            status_code: response.status_code,
            headers: to_json(&response.headers),
            response: response.body.clone(),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Option<String> {
    serde_json::to_string(value).ok()
}
