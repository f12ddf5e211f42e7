use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Deserialize;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use super::{Format, LogEvent};
use crate::correlation::CorrelationContext;

/// Built-in sink selection, as named in `logging.handlers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    File,
    Console,
    Db,
}

/// Destination for log events.
///
/// Sinks must not fail back into the caller; write errors are reported on
/// the process diagnostics channel and the event is dropped.
pub trait Sink: Send + Sync {
    fn emit(&self, event: &LogEvent, context: Option<&CorrelationContext>);

    /// Name of this sink, for diagnostics.
    fn name(&self) -> &str {
        "custom"
    }
}

/// Writes formatted events to stdout, or to any writer given to
/// [`ConsoleSink::with_writer`].
pub struct ConsoleSink {
    formatter: Box<dyn Format>,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    pub fn new(formatter: Box<dyn Format>) -> Self {
        Self::with_writer(formatter, Box::new(io::stdout()))
    }

    pub fn with_writer(formatter: Box<dyn Format>, out: Box<dyn Write + Send>) -> Self {
        Self {
            formatter,
            out: Mutex::new(out),
        }
    }
}

impl Sink for ConsoleSink {
    fn emit(&self, event: &LogEvent, _context: Option<&CorrelationContext>) {
        let line = self.formatter.format(event);
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            tracing::warn!("Failed to write log line to console: {}", e);
        }
    }

    fn name(&self) -> &str {
        "console"
    }
}

/// Appends formatted events to a file, one per line. The file is never
/// rotated.
pub struct FileSink {
    path: PathBuf,
    formatter: Box<dyn Format>,
    appender: Mutex<RollingFileAppender>,
}

impl FileSink {
    /// Open (or create) `path` for appending, creating parent directories.
    pub fn open(path: impl AsRef<Path>, formatter: Box<dyn Format>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a log file path: {}", path.display()),
                )
            })?;
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name)
            .build(dir)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        Ok(Self {
            path,
            formatter,
            appender: Mutex::new(appender),
        })
    }

    /// `<root>/<logger>/<logger>_.log`
    pub fn path_for(root: impl AsRef<Path>, logger: &str) -> PathBuf {
        root.as_ref().join(logger).join(format!("{logger}_.log"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    fn emit(&self, event: &LogEvent, _context: Option<&CorrelationContext>) {
        let mut line = self.formatter.format(event);
        line.push('\n');
        let mut appender = self.appender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = appender.write_all(line.as_bytes()) {
            tracing::warn!("Failed to write log file {}: {}", self.path.display(), e);
        }
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{Level, PatternFormatter};
    use std::fs;
    use std::panic::Location;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn event(message: &str) -> LogEvent {
        LogEvent::capture("Requester", Level::Info, message.to_string(), Location::caller())
    }

    #[test]
    fn test_console_sink_writes_one_line_per_event() {
        let buffer = SharedBuffer::default();
        let sink = ConsoleSink::with_writer(
            Box::new(PatternFormatter::new("{level} {message}")),
            Box::new(buffer.clone()),
        );
        sink.emit(&event("up"), None);
        sink.emit(&event("down"), None);

        let written = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written, "INFO up\nINFO down\n");
    }

    #[test]
    fn test_console_write_failure_does_not_reach_caller() {
        let sink = ConsoleSink::with_writer(Box::new(PatternFormatter::default()), Box::new(BrokenPipe));
        sink.emit(&event("lost"), None);
        sink.emit(&event("also lost"), None);
    }

    #[test]
    fn test_sink_kind_deserializes_lowercase() {
        let kinds: Vec<SinkKind> = serde_json::from_str(r#"["file", "console", "db"]"#).unwrap();
        assert_eq!(kinds, vec![SinkKind::File, SinkKind::Console, SinkKind::Db]);
    }

    #[test]
    fn test_path_for_nests_by_logger_name() {
        let path = FileSink::path_for("Logs", "Requester");
        assert_eq!(path, PathBuf::from("Logs/Requester/Requester_.log"));
    }

    #[test]
    fn test_file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = FileSink::path_for(dir.path(), "Requester");
        let sink = FileSink::open(&path, Box::new(PatternFormatter::new("{level} {message}"))).unwrap();

        for message in ["first", "second"] {
            sink.emit(&event(message), None);
        }

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "INFO first\nINFO second\n");
    }

    #[test]
    fn test_file_sink_reopen_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = FileSink::path_for(dir.path(), "Requests");
        for message in ["before restart", "after restart"] {
            let sink = FileSink::open(&path, Box::new(PatternFormatter::new("{message}"))).unwrap();
            sink.emit(&event(message), None);
        }

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "before restart\nafter restart\n");
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
