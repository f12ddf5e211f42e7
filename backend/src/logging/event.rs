use std::panic::Location;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Level;

/// One emitted diagnostic message. Immutable once captured.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub logger: String,
    pub message: String,
    pub source: SourceLocation,
    pub thread: ThreadInfo,
    pub process: ProcessInfo,
}

/// Call site that produced an event.
///
/// Built from `#[track_caller]`, which records file and line but not the
/// enclosing function, so the audit table's `funcname` column stays NULL.
#[derive(Debug, Clone, Serialize)]
pub struct SourceLocation {
    /// Path as recorded by the compiler, e.g. `src/requester/mod.rs`.
    pub pathname: String,
    pub line: u32,
}

impl SourceLocation {
    pub fn from_location(location: &Location<'_>) -> Self {
        Self {
            pathname: location.file().to_string(),
            line: location.line(),
        }
    }

    /// File name without directories.
    pub fn filename(&self) -> &str {
        Path::new(&self.pathname)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.pathname)
    }

    /// File name without extension.
    pub fn module(&self) -> &str {
        Path::new(&self.pathname)
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.pathname)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadInfo {
    pub id: String,
    pub name: Option<String>,
}

impl ThreadInfo {
    pub fn current() -> Self {
        let thread = std::thread::current();
        Self {
            id: format!("{:?}", thread.id()),
            name: thread.name().map(String::from),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub id: u32,
    pub name: String,
}

impl ProcessInfo {
    pub fn current() -> Self {
        static NAME: OnceLock<String> = OnceLock::new();
        let name = NAME.get_or_init(|| {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "unknown".to_string())
        });
        Self {
            id: std::process::id(),
            name: name.clone(),
        }
    }
}

impl LogEvent {
    /// Capture an event on the current thread.
    pub fn capture(
        logger: &str,
        level: Level,
        message: String,
        location: &Location<'_>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            logger: logger.to_string(),
            message,
            source: SourceLocation::from_location(location),
            thread: ThreadInfo::current(),
            process: ProcessInfo::current(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_records_call_site() {
        let event = LogEvent::capture("Requester", Level::Info, "hello".to_string(), Location::caller());
        assert_eq!(event.logger, "Requester");
        assert_eq!(event.level, Level::Info);
        assert_eq!(event.message, "hello");
        assert_eq!(event.source.filename(), "event.rs");
        assert_eq!(event.source.module(), "event");
        assert!(event.source.line > 0);
        assert_eq!(event.process.id, std::process::id());
        assert!(!event.thread.id.is_empty());
    }

    #[test]
    fn test_source_location_without_directories() {
        let source = SourceLocation {
            pathname: "main.rs".to_string(),
            line: 3,
        };
        assert_eq!(source.filename(), "main.rs");
        assert_eq!(source.module(), "main");
    }
}
