//! Named, leveled loggers with pluggable sinks.
//!
//! [`LoggerRegistry`] builds loggers wired to the console, a per-logger
//! file and the audit store, as selected by `logging.handlers`. Callers
//! hold a [`SuppressibleAdapter`], which adds a kill switch on top of the
//! logger's severity threshold.
//!
//! This is the application's audit and diagnostics pipeline. The crate's
//! own operational messages (and failures inside the pipeline itself) go
//! through `tracing`.

pub mod adapter;
pub mod event;
pub mod format;
pub mod level;
pub mod registry;
pub mod sink;

pub use adapter::{Log, SuppressibleAdapter};
pub use event::{LogEvent, ProcessInfo, SourceLocation, ThreadInfo};
pub use format::{default_palette, ColourFormatter, Format, PatternFormatter, DEFAULT_FORMAT};
pub use level::{Level, UnknownLevel};
pub use registry::{Logger, LoggerOptions, LoggerRegistry, LoggingError};
pub use sink::{ConsoleSink, FileSink, Sink, SinkKind};
