use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use colored::Color;

use super::{
    ColourFormatter, ConsoleSink, FileSink, Level, Log, LogEvent, PatternFormatter, Sink, SinkKind,
    SuppressibleAdapter, DEFAULT_FORMAT,
};
use crate::audit::{self, AuditError, AuditSink, AuditStore};
use crate::config::{DbConfig, LoggingConfig};
use crate::correlation::CorrelationContext;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Audit store error: {0}")]
    Audit(#[from] AuditError),
}

/// Per-logger settings passed to [`LoggerRegistry::create`].
#[derive(Clone)]
pub struct LoggerOptions {
    /// Threshold; `None` uses `logging.level`.
    pub level: Option<Level>,
    pub format: String,
    /// Built-in sinks; `None` uses `logging.handlers`.
    pub sinks: Option<Vec<SinkKind>>,
    /// Colour the level label on the console.
    pub colour: bool,
    pub palette: Option<HashMap<String, Color>>,
    /// Let the audit sink snapshot inbound requests and responses.
    pub capture_correlation: bool,
    pub extra_sinks: Vec<Arc<dyn Sink>>,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            level: None,
            format: DEFAULT_FORMAT.to_string(),
            sinks: None,
            colour: true,
            palette: None,
            capture_correlation: false,
            extra_sinks: Vec::new(),
        }
    }
}

impl LoggerOptions {
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_sinks(mut self, sinks: impl IntoIterator<Item = SinkKind>) -> Self {
        self.sinks = Some(sinks.into_iter().collect());
        self
    }

    pub fn with_colour(mut self, colour: bool) -> Self {
        self.colour = colour;
        self
    }

    pub fn with_palette(mut self, palette: HashMap<String, Color>) -> Self {
        self.palette = Some(palette);
        self
    }

    pub fn with_capture_correlation(mut self, capture: bool) -> Self {
        self.capture_correlation = capture;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.extra_sinks.push(sink);
        self
    }
}

/// A named logger: a threshold plus the sinks it fans out to.
pub struct Logger {
    name: String,
    state: RwLock<LoggerState>,
}

struct LoggerState {
    level: Level,
    sinks: Vec<Arc<dyn Sink>>,
}

impl Logger {
    fn new(name: &str, level: Level, sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(LoggerState { level, sinks }),
        }
    }

    fn replace(&self, level: Level, sinks: Vec<Arc<dyn Sink>>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.level = level;
        state.sinks = sinks;
    }

    pub fn level(&self) -> Level {
        self.state.read().unwrap_or_else(PoisonError::into_inner).level
    }

    pub fn sink_names(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.sinks.iter().map(|s| s.name().to_string()).collect()
    }
}

impl Log for Logger {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self, level: Level) -> bool {
        level >= self.level()
    }

    fn dispatch(&self, event: &LogEvent, context: Option<&CorrelationContext>) {
        // Snapshot the sink list so a concurrent re-create never blocks on
        // a slow sink.
        let sinks = self.state.read().unwrap_or_else(PoisonError::into_inner).sinks.clone();
        for sink in sinks {
            sink.emit(event, context);
        }
    }
}

/// Builds and tracks named loggers.
///
/// Owned by the application root and shared by reference; there is no
/// process-wide logger table.
pub struct LoggerRegistry {
    config: LoggingConfig,
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    loggers: HashMap<String, Arc<Logger>>,
    /// Name of the single logger allowed to snapshot correlated calls.
    correlation_owner: Option<String>,
    store: Option<Arc<dyn AuditStore>>,
}

impl LoggerRegistry {
    pub fn new(config: LoggingConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Use an already-open audit store instead of opening one from
    /// `logging.db`.
    pub fn with_store(config: LoggingConfig, store: Arc<dyn AuditStore>) -> Self {
        Self {
            config,
            inner: Mutex::new(RegistryInner {
                store: Some(store),
                ..RegistryInner::default()
            }),
        }
    }

    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }

    /// Create the logger `name`, or rebuild it if it already exists.
    ///
    /// Rebuilding replaces the previous sinks and threshold; adapters
    /// handed out earlier keep working against the new configuration.
    pub fn create(
        &self,
        name: &str,
        options: LoggerOptions,
    ) -> Result<SuppressibleAdapter, LoggingError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let capture = if options.capture_correlation {
            match inner.correlation_owner.as_deref() {
                Some(owner) if owner != name => {
                    tracing::debug!(
                        "Logger {} requested correlation capture already held by {}",
                        name,
                        owner
                    );
                    false
                }
                _ => true,
            }
        } else {
            false
        };

        let level = options.level.unwrap_or(self.config.level);
        let sinks = self.build_sinks(&mut inner, name, &options, capture)?;

        if capture {
            inner.correlation_owner = Some(name.to_string());
        } else if inner.correlation_owner.as_deref() == Some(name) {
            inner.correlation_owner = None;
        }

        let logger = match inner.loggers.get(name) {
            Some(existing) => {
                existing.replace(level, sinks);
                existing.clone()
            }
            None => {
                let logger = Arc::new(Logger::new(name, level, sinks));
                inner.loggers.insert(name.to_string(), logger.clone());
                logger
            }
        };

        Ok(SuppressibleAdapter::new(logger))
    }

    /// A fresh adapter for an existing logger.
    pub fn get(&self, name: &str) -> Option<SuppressibleAdapter> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .loggers
            .get(name)
            .map(|logger| SuppressibleAdapter::new(logger.clone()))
    }

    pub fn logger(&self, name: &str) -> Option<Arc<Logger>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.loggers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = inner.loggers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn correlation_owner(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.correlation_owner.clone()
    }

    fn build_sinks(
        &self,
        inner: &mut RegistryInner,
        name: &str,
        options: &LoggerOptions,
        capture: bool,
    ) -> Result<Vec<Arc<dyn Sink>>, LoggingError> {
        let kinds = options
            .sinks
            .clone()
            .unwrap_or_else(|| self.config.handlers.clone());
        let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();

        if kinds.contains(&SinkKind::File) {
            let path = self.log_file(name);
            let sink = FileSink::open(&path, Box::new(PatternFormatter::new(&options.format)))
                .map_err(|e| LoggingError::IoError(format!("{}: {}", path.display(), e)))?;
            sinks.push(Arc::new(sink));
        }

        if kinds.contains(&SinkKind::Console) {
            let sink = if options.colour {
                let mut formatter = ColourFormatter::new(&options.format);
                if let Some(palette) = &options.palette {
                    formatter = formatter.with_palette(palette.clone());
                }
                ConsoleSink::new(Box::new(formatter))
            } else {
                ConsoleSink::new(Box::new(PatternFormatter::new(&options.format)))
            };
            sinks.push(Arc::new(sink));
        }

        if kinds.contains(&SinkKind::Db) {
            let store = self.audit_store(inner)?;
            let sink = AuditSink::new(store, capture)?;
            if let Some(days) = self.config.db.as_ref().and_then(|db| db.retention_days) {
                sink.prune_older_than(chrono::Duration::days(i64::from(days)));
            }
            sinks.push(Arc::new(sink));
        }

        sinks.extend(options.extra_sinks.iter().cloned());
        Ok(sinks)
    }

    fn audit_store(&self, inner: &mut RegistryInner) -> Result<Arc<dyn AuditStore>, LoggingError> {
        if let Some(store) = &inner.store {
            return Ok(store.clone());
        }

        let db = self.config.db.as_ref().ok_or_else(|| {
            LoggingError::Configuration(
                "logging.db must be configured when the db handler is enabled".to_string(),
            )
        })?;
        validate_db(db)?;

        let store = audit::open_store(db)?;
        inner.store = Some(store.clone());
        Ok(store)
    }

    fn log_file(&self, name: &str) -> PathBuf {
        FileSink::path_for(&self.config.dir, name)
    }
}

fn validate_db(db: &DbConfig) -> Result<(), LoggingError> {
    use crate::config::DbBackend;

    match db.backend {
        DbBackend::Sqlite if db.name.trim().is_empty() => Err(LoggingError::Configuration(
            "logging.db.name (database path) is required for the sqlite backend".to_string(),
        )),
        _ => Ok(()),
    }
}
