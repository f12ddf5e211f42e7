pub mod audit;
pub mod config;
pub mod correlation;
pub mod error;
pub mod logging;
pub mod models;
pub mod requester;
pub mod routes;
pub mod test_util;

pub use audit::{AuditSink, AuditStore, MemoryAuditStore, SqliteAuditStore};
pub use config::Config;
pub use correlation::CorrelationContext;
pub use logging::{LoggerOptions, LoggerRegistry, SuppressibleAdapter};
pub use requester::{CallOptions, ForwardError, RequestForwarder};

use std::sync::Arc;

/// Name of the logger that records inbound calls.
pub const REQUESTS_LOGGER: &str = "Requests";

/// Name of the logger used by the upstream forwarder.
pub const REQUESTER_LOGGER: &str = "Requester";

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<LoggerRegistry>,
    /// Logger for inbound calls; snapshots requests and responses when the
    /// db handler is enabled.
    pub request_log: SuppressibleAdapter,
    pub forwarder: RequestForwarder,
}

impl AppState {
    /// Create the application loggers from `config.logging` and wire up the
    /// forwarder.
    pub fn build(config: Config, registry: Arc<LoggerRegistry>) -> Result<Self, logging::LoggingError> {
        let request_log = registry.create(
            REQUESTS_LOGGER,
            LoggerOptions::default().with_capture_correlation(true),
        )?;
        let requester_log = registry.create(REQUESTER_LOGGER, LoggerOptions::default())?;
        let forwarder = RequestForwarder::new(&config.api, &config.server.owner, requester_log);

        Ok(Self {
            config,
            registry,
            request_log,
            forwarder,
        })
    }
}
