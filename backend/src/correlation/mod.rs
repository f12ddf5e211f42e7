//! Per-call correlation state for inbound requests.
//!
//! The request-handling layer creates one [`CorrelationContext`] per
//! inbound call, passes it by reference into correlated log calls, and
//! marks it completed once the response is known. [`middleware::correlate`]
//! is the stock implementation of that lifecycle; logging code only ever
//! reads the context.

pub mod middleware;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::OnceLock;

use axum::http::{header, request, response, HeaderMap};
use serde::Serialize;
use uuid::Uuid;

/// Inbound call metadata captured when the request arrives.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InboundRequest {
    pub method: String,
    /// Absolute URL including the query string.
    pub url: String,
    /// Absolute URL without the query string.
    pub base_url: String,
    /// Path plus `?` and query string.
    pub full_path: String,
    pub host: String,
    /// `scheme://host/`
    pub host_url: String,
    pub args: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub headers: Vec<(String, String)>,
    pub peer_addr: Option<SocketAddr>,
    /// Matched route pattern, e.g. `/api/*path`.
    pub endpoint: Option<String>,
    /// Captured route parameters.
    pub view_args: BTreeMap<String, String>,
    pub routing_error: Option<String>,
}

impl InboundRequest {
    /// Build from request parts. `scheme` is taken from the URI when
    /// absolute, otherwise `http` is assumed.
    pub fn from_parts(parts: &request::Parts, peer_addr: Option<SocketAddr>) -> Self {
        let uri = &parts.uri;
        let host = uri
            .authority()
            .map(|a| a.to_string())
            .or_else(|| header_str(&parts.headers, header::HOST.as_str()))
            .unwrap_or_else(|| "localhost".to_string());
        let scheme = uri.scheme_str().unwrap_or("http");
        let host_url = format!("{scheme}://{host}/");
        let path = uri.path();
        let query = uri.query().unwrap_or("");

        let base_url = format!("{scheme}://{host}{path}");
        let url = if query.is_empty() {
            base_url.clone()
        } else {
            format!("{base_url}?{query}")
        };

        let args = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();

        let cookies = parts
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        Self {
            method: parts.method.to_string(),
            url,
            base_url,
            full_path: format!("{path}?{query}"),
            host,
            host_url,
            args,
            cookies,
            headers: header_pairs(&parts.headers),
            peer_addr,
            endpoint: None,
            view_args: BTreeMap::new(),
            routing_error: None,
        }
    }

    /// First value of a header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Client address: the first `X-Forwarded-For` hop when present,
    /// otherwise the peer IP.
    pub fn client_addr(&self) -> Option<String> {
        self.forwarded_for()
            .into_iter()
            .next()
            .or_else(|| self.peer_addr.map(|a| a.ip().to_string()))
    }

    /// Forwarded hops followed by the peer, client first.
    pub fn access_route(&self) -> Vec<String> {
        let mut route = self.forwarded_for();
        if route.is_empty() {
            if let Some(peer) = self.peer_addr {
                route.push(peer.ip().to_string());
            }
        }
        route
    }

    /// First path segment of the matched route, e.g. `api`.
    pub fn blueprint(&self) -> Option<String> {
        self.endpoint.as_deref().and_then(|endpoint| {
            endpoint
                .trim_start_matches('/')
                .split('/')
                .next()
                .filter(|segment| !segment.is_empty() && !segment.starts_with([':', '*']))
                .map(String::from)
        })
    }

    fn forwarded_for(&self) -> Vec<String> {
        self.header("x-forwarded-for")
            .map(|v| {
                v.split(',')
                    .map(|hop| hop.trim().to_string())
                    .filter(|hop| !hop.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Outbound result recorded when the call completes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutboundResponse {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    /// Body as text, or a short marker when the body was not captured.
    pub body: String,
}

impl OutboundResponse {
    pub fn from_parts(parts: &response::Parts, body: String) -> Self {
        Self {
            status_code: parts.status.as_u16(),
            headers: header_pairs(&parts.headers),
            body,
        }
    }

    /// Status line, e.g. `200 OK`.
    pub fn status(&self) -> String {
        match axum::http::StatusCode::from_u16(self.status_code)
            .ok()
            .and_then(|s| s.canonical_reason())
        {
            Some(reason) => format!("{} {}", self.status_code, reason),
            None => self.status_code.to_string(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// State for one inbound call.
#[derive(Debug)]
pub struct CorrelationContext {
    id: Uuid,
    request: InboundRequest,
    response: OnceLock<OutboundResponse>,
}

impl CorrelationContext {
    pub fn new(request: InboundRequest) -> Self {
        Self::with_id(Uuid::new_v4(), request)
    }

    pub fn with_id(id: Uuid, request: InboundRequest) -> Self {
        Self {
            id,
            request,
            response: OnceLock::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &InboundRequest {
        &self.request
    }

    pub fn is_completed(&self) -> bool {
        self.response.get().is_some()
    }

    pub fn response(&self) -> Option<&OutboundResponse> {
        self.response.get()
    }

    /// Mark the call completed. Returns `false` if it already was; the
    /// first response wins.
    pub fn complete(&self, response: OutboundResponse) -> bool {
        self.response.set(response).is_ok()
    }
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}
