//! Caching proxy for the upstream RAWG API.

pub mod cache;
pub mod clock;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, FROM, USER_AGENT};
use reqwest::{Client, Method};
use serde_json::Value;
use uuid::Uuid;

pub use cache::{cache_key, CacheEntry, ResponseCache, SWEEP_INTERVAL};
pub use clock::{Clock, ManualClock, SystemClock};

use crate::config::{ApiConfig, OwnerConfig};
use crate::logging::SuppressibleAdapter;

/// Replaces the API key wherever it would otherwise leak.
pub const KEY_PLACEHOLDER: &str = "KEY";

/// Query parameter carrying the API key.
pub const KEY_PARAM: &str = "key";

/// Payload fields holding pagination URLs.
const PAGINATION_FIELDS: [&str; 2] = ["next", "previous"];

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Upstream returned {status} for {url}: {body}")]
    Upstream { status: u16, url: String, body: String },
    #[error("HTTP request failed: {0}")]
    Transport(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    #[error("Invalid body: {0}")]
    InvalidBody(String),
}

/// Per-call inputs for [`RequestForwarder`].
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    /// JSON body, sent as-is for POST and PUT. A DELETE sends the fields
    /// of an object body as query parameters.
    pub body: Option<Value>,
    /// Treat `path` as an absolute URL.
    pub overwrite_url: bool,
    /// Always go to the network. The fresh payload is still cached.
    pub skip_cache: bool,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn overwrite_url(mut self, overwrite: bool) -> Self {
        self.overwrite_url = overwrite;
        self
    }

    pub fn skip_cache(mut self, skip: bool) -> Self {
        self.skip_cache = skip;
        self
    }
}

/// Forwards calls to the upstream API, attaching the API key and operator
/// headers, and caches sanitized JSON payloads for `api.cache_expiry`.
///
/// Concurrent identical misses all reach the network; the last one to
/// finish owns the cache entry.
pub struct RequestForwarder {
    http_client: Client,
    base: String,
    key: String,
    user_agent: String,
    contact: String,
    log: SuppressibleAdapter,
    cache: ResponseCache,
    clock: Arc<dyn Clock>,
}

impl RequestForwarder {
    pub fn new(api: &ApiConfig, owner: &OwnerConfig, log: SuppressibleAdapter) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            http_client: Client::new(),
            base: api.base.clone(),
            key: api.key.clone(),
            user_agent: format!("IA3 {}", owner.name).trim_end().to_string(),
            contact: owner.email.clone(),
            log,
            cache: ResponseCache::new(Duration::from_secs(api.cache_expiry), clock.now()),
            clock,
        }
    }

    /// Replace the time source. Resets the cache.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.cache = ResponseCache::new(self.cache.ttl(), clock.now());
        self.clock = clock;
        self
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn log(&self) -> &SuppressibleAdapter {
        &self.log
    }

    pub async fn get(&self, path: &str, options: CallOptions) -> Result<Value, ForwardError> {
        self.action(Method::GET, path, options).await
    }

    pub async fn post(&self, path: &str, options: CallOptions) -> Result<Value, ForwardError> {
        self.action(Method::POST, path, options).await
    }

    pub async fn put(&self, path: &str, options: CallOptions) -> Result<Value, ForwardError> {
        self.action(Method::PUT, path, options).await
    }

    pub async fn delete(&self, path: &str, options: CallOptions) -> Result<Value, ForwardError> {
        self.action(Method::DELETE, path, options).await
    }

    /// Absolute URL for `path`. A `/` is inserted only when neither side
    /// already has one.
    pub fn resolve(&self, path: &str, overwrite_url: bool) -> String {
        if overwrite_url {
            path.to_string()
        } else if path.starts_with('/') || self.base.ends_with('/') {
            format!("{}{}", self.base, path)
        } else {
            format!("{}/{}", self.base, path)
        }
    }

    async fn action(
        &self,
        method: Method,
        path: &str,
        mut options: CallOptions,
    ) -> Result<Value, ForwardError> {
        // The key is ours to add.
        options.params.remove(KEY_PARAM);

        let url = self.resolve(path, options.overwrite_url);
        let call_id = Uuid::new_v4();
        self.log.info(format_args!(
            "[{}] {} {} params={:?}",
            call_id,
            method,
            self.scrub(&url),
            options.params
        ));

        let now = self.clock.now();
        let swept = self.cache.sweep_if_due(now);
        if swept > 0 {
            self.log
                .debug(format_args!("[{}] swept {} expired cache entries", call_id, swept));
        }

        let key = cache_key(
            method.as_str(),
            &url,
            &options.params,
            &options.headers,
            options.body.as_ref(),
        );

        if !options.skip_cache {
            if let Some(payload) = self.cache.lookup(&key, now) {
                self.log.debug(format_args!("[{}] served from cache", call_id));
                return Ok(payload);
            }
        }

        let payload = match self.send(&method, &url, &options).await {
            Ok(payload) => self.sanitize(payload),
            Err(e) => {
                let e = self.scrub_error(e);
                self.log.error(format_args!("[{}] {}", call_id, e));
                return Err(e);
            }
        };

        self.cache.store(key, payload.clone(), self.clock.now());
        Ok(payload)
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        options: &CallOptions,
    ) -> Result<Value, ForwardError> {
        let mut query: Vec<(String, String)> = options
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut request = self
            .http_client
            .request(method.clone(), url)
            .headers(self.headers(&options.headers)?);

        if let Some(body) = &options.body {
            if *method == Method::POST || *method == Method::PUT {
                request = request.json(body);
            } else if *method == Method::DELETE {
                query.extend(body_query(body)?);
            }
        }

        query.push((KEY_PARAM.to_string(), self.key.clone()));
        request = request.query(&query);

        let response = request
            .send()
            .await
            .map_err(|e| ForwardError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ForwardError::Upstream {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ForwardError::InvalidResponse(e.to_string()))
    }

    /// Caller headers plus the operator identity. The identity is set last
    /// so a caller cannot replace it.
    fn headers(&self, extra: &BTreeMap<String, String>) -> Result<HeaderMap, ForwardError> {
        let mut headers = HeaderMap::new();
        for (name, value) in extra {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ForwardError::InvalidHeader(format!("{}: {}", name, e)))?;
            headers.insert(name, header_value(value)?);
        }

        headers.insert(USER_AGENT, header_value(&self.user_agent)?);
        if self.contact.is_empty() {
            headers.remove(FROM);
        } else {
            headers.insert(FROM, header_value(&self.contact)?);
        }
        Ok(headers)
    }

    /// Replace the key in pagination URLs.
    fn sanitize(&self, mut payload: Value) -> Value {
        if let Value::Object(fields) = &mut payload {
            for field in PAGINATION_FIELDS {
                if let Some(Value::String(link)) = fields.get_mut(field) {
                    *link = self.scrub(link);
                }
            }
        }
        payload
    }

    fn scrub(&self, text: &str) -> String {
        if self.key.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.key, KEY_PLACEHOLDER)
        }
    }

    fn scrub_error(&self, error: ForwardError) -> ForwardError {
        match error {
            ForwardError::Upstream { status, url, body } => ForwardError::Upstream {
                status,
                url: self.scrub(&url),
                body: self.scrub(&body),
            },
            ForwardError::Transport(message) => ForwardError::Transport(self.scrub(&message)),
            ForwardError::InvalidResponse(message) => {
                ForwardError::InvalidResponse(self.scrub(&message))
            }
            ForwardError::InvalidHeader(message) => ForwardError::InvalidHeader(message),
            ForwardError::InvalidBody(message) => ForwardError::InvalidBody(message),
        }
    }
}

/// Query pairs for a DELETE body. Only a JSON object maps onto a query
/// string; the key parameter is never taken from the body.
fn body_query(body: &Value) -> Result<Vec<(String, String)>, ForwardError> {
    let Value::Object(fields) = body else {
        return Err(ForwardError::InvalidBody(
            "DELETE body must be a JSON object".to_string(),
        ));
    };

    Ok(fields
        .iter()
        .filter(|(name, _)| name.as_str() != KEY_PARAM)
        .map(|(name, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect())
}

fn header_value(value: &str) -> Result<HeaderValue, ForwardError> {
    HeaderValue::from_str(value).map_err(|e| ForwardError::InvalidHeader(format!("{}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LoggerOptions, LoggerRegistry};
    use crate::config::LoggingConfig;
    use serde_json::json;

    fn forwarder(base: &str, key: &str) -> RequestForwarder {
        let registry = LoggerRegistry::new(LoggingConfig {
            handlers: vec![],
            ..LoggingConfig::default()
        });
        let log = registry.create("Requester", LoggerOptions::default()).unwrap();
        RequestForwarder::new(
            &ApiConfig {
                base: base.to_string(),
                key: key.to_string(),
                cache_expiry: 60,
            },
            &OwnerConfig {
                name: "Jo".to_string(),
                email: "jo@example.com".to_string(),
            },
            log,
        )
    }

    #[test]
    fn test_resolve_inserts_single_separator() {
        assert_eq!(forwarder("http://h/api", "k").resolve("games", false), "http://h/api/games");
        assert_eq!(forwarder("http://h/api", "k").resolve("/games", false), "http://h/api/games");
        assert_eq!(forwarder("http://h/api/", "k").resolve("games", false), "http://h/api/games");
        assert_eq!(
            forwarder("http://h/api", "k").resolve("http://other/x?page=2", true),
            "http://other/x?page=2"
        );
    }

    #[test]
    fn test_sanitize_only_touches_pagination_links() {
        let forwarder = forwarder("http://h/api", "s3cret");
        let payload = forwarder.sanitize(json!({
            "next": "http://h/api/games?key=s3cret&page=2",
            "previous": null,
            "results": [{"name": "s3cret"}],
        }));

        assert_eq!(payload["next"], "http://h/api/games?key=KEY&page=2");
        assert_eq!(payload["previous"], Value::Null);
        assert_eq!(payload["results"][0]["name"], "s3cret");
    }

    #[test]
    fn test_empty_key_disables_scrubbing() {
        let forwarder = forwarder("http://h/api", "");
        assert_eq!(forwarder.scrub("http://h/api?key="), "http://h/api?key=");
    }

    #[test]
    fn test_scrub_error_removes_key() {
        let forwarder = forwarder("http://h/api", "s3cret");
        let error = forwarder.scrub_error(ForwardError::Transport(
            "error sending request for url (http://h/api/games?key=s3cret)".to_string(),
        ));
        assert!(!error.to_string().contains("s3cret"));
        assert!(error.to_string().contains("key=KEY"));
    }

    #[test]
    fn test_headers_identify_operator() {
        let forwarder = forwarder("http://h/api", "k");
        let headers = forwarder
            .headers(&BTreeMap::from([("Accept".to_string(), "application/json".to_string())]))
            .unwrap();
        assert_eq!(headers.get(USER_AGENT).unwrap(), "IA3 Jo");
        assert_eq!(headers.get(FROM).unwrap(), "jo@example.com");
        assert_eq!(headers.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn test_caller_cannot_replace_operator_identity() {
        let forwarder = forwarder("http://h/api", "k");
        let headers = forwarder
            .headers(&BTreeMap::from([
                ("User-Agent".to_string(), "spoof".to_string()),
                ("From".to_string(), "nobody".to_string()),
            ]))
            .unwrap();
        assert_eq!(headers.get_all(USER_AGENT).iter().count(), 1);
        assert_eq!(headers.get(USER_AGENT).unwrap(), "IA3 Jo");
        assert_eq!(headers.get(FROM).unwrap(), "jo@example.com");
    }

    #[test]
    fn test_delete_body_flattens_to_query() {
        let pairs = body_query(&json!({"id": 7, "name": "x", "key": "stolen"})).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("id".to_string(), "7".to_string()),
                ("name".to_string(), "x".to_string()),
            ]
        );
        assert!(matches!(
            body_query(&json!([1, 2])),
            Err(ForwardError::InvalidBody(_))
        ));
    }

    #[test]
    fn test_invalid_header_name_is_rejected() {
        let forwarder = forwarder("http://h/api", "k");
        let result = forwarder.headers(&BTreeMap::from([("bad header".to_string(), "v".to_string())]));
        assert!(matches!(result, Err(ForwardError::InvalidHeader(_))));
    }
}
