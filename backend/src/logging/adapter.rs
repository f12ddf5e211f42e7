use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{Level, LogEvent};
use crate::correlation::CorrelationContext;

/// Anything an adapter can delegate to.
pub trait Log: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the configured threshold lets `level` through.
    fn enabled(&self, level: Level) -> bool;

    /// Fan the event out to every attached sink.
    fn dispatch(&self, event: &LogEvent, context: Option<&CorrelationContext>);
}

/// Logger handle with an on/off kill switch.
///
/// Suppression is independent of the logger's severity threshold: while
/// suppressed, nothing reaches any sink. Each adapter owns its own flag,
/// so silencing one handle leaves other handles to the same logger alone.
pub struct SuppressibleAdapter {
    inner: Arc<dyn Log>,
    suppressed: AtomicBool,
}

impl SuppressibleAdapter {
    pub fn new(inner: Arc<dyn Log>) -> Self {
        Self {
            inner,
            suppressed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn suppress(&self) {
        self.suppressed.store(true, Ordering::SeqCst);
    }

    pub fn unsuppress(&self) {
        self.suppressed.store(false, Ordering::SeqCst);
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }

    #[track_caller]
    pub fn log(&self, level: Level, message: impl fmt::Display) {
        self.emit(level, message, None, Location::caller());
    }

    /// Log within an inbound call, so correlating sinks can snapshot it.
    #[track_caller]
    pub fn log_in(&self, context: &CorrelationContext, level: Level, message: impl fmt::Display) {
        self.emit(level, message, Some(context), Location::caller());
    }

    #[track_caller]
    pub fn debug(&self, message: impl fmt::Display) {
        self.emit(Level::Debug, message, None, Location::caller());
    }

    #[track_caller]
    pub fn info(&self, message: impl fmt::Display) {
        self.emit(Level::Info, message, None, Location::caller());
    }

    #[track_caller]
    pub fn warning(&self, message: impl fmt::Display) {
        self.emit(Level::Warning, message, None, Location::caller());
    }

    #[track_caller]
    pub fn error(&self, message: impl fmt::Display) {
        self.emit(Level::Error, message, None, Location::caller());
    }

    #[track_caller]
    pub fn critical(&self, message: impl fmt::Display) {
        self.emit(Level::Critical, message, None, Location::caller());
    }

    fn emit(
        &self,
        level: Level,
        message: impl fmt::Display,
        context: Option<&CorrelationContext>,
        location: &Location<'_>,
    ) {
        if self.is_suppressed() || !self.inner.enabled(level) {
            return;
        }
        let event = LogEvent::capture(self.inner.name(), level, message.to_string(), location);
        self.inner.dispatch(&event, context);
    }
}

impl fmt::Debug for SuppressibleAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuppressibleAdapter")
            .field("name", &self.name())
            .field("suppressed", &self.is_suppressed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every dispatched event; threshold fixed at construction.
    struct Recorder {
        threshold: Level,
        events: Mutex<Vec<LogEvent>>,
    }

    impl Recorder {
        fn new(threshold: Level) -> Arc<Self> {
            Arc::new(Self {
                threshold,
                events: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    impl Log for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn enabled(&self, level: Level) -> bool {
            level >= self.threshold
        }

        fn dispatch(&self, event: &LogEvent, _context: Option<&CorrelationContext>) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_log_forwards_when_not_suppressed() {
        let recorder = Recorder::new(Level::Debug);
        let adapter = SuppressibleAdapter::new(recorder.clone());
        adapter.info("hello");
        adapter.log(Level::Error, format_args!("code {}", 42));
        assert_eq!(recorder.count(), 2);
        let events = recorder.events.lock().unwrap();
        assert_eq!(events[1].message, "code 42");
        assert_eq!(events[1].logger, "recorder");
    }

    #[test]
    fn test_suppressed_adapter_drops_every_level() {
        let recorder = Recorder::new(Level::Debug);
        let adapter = SuppressibleAdapter::new(recorder.clone());
        adapter.suppress();
        for _ in 0..10 {
            for level in Level::ALL {
                adapter.log(level, "ignored");
            }
        }
        assert_eq!(recorder.count(), 0);
    }

    #[test]
    fn test_suppress_and_unsuppress_are_idempotent() {
        let recorder = Recorder::new(Level::Debug);
        let adapter = SuppressibleAdapter::new(recorder.clone());
        adapter.suppress();
        adapter.suppress();
        assert!(adapter.is_suppressed());
        adapter.unsuppress();
        adapter.unsuppress();
        assert!(!adapter.is_suppressed());
        adapter.warning("back");
        assert_eq!(recorder.count(), 1);
    }

    #[test]
    fn test_threshold_still_applies_when_unsuppressed() {
        let recorder = Recorder::new(Level::Warning);
        let adapter = SuppressibleAdapter::new(recorder.clone());
        adapter.debug("filtered");
        adapter.info("filtered");
        adapter.critical("kept");
        assert_eq!(recorder.count(), 1);
    }

    #[test]
    fn test_each_adapter_has_its_own_switch() {
        let recorder = Recorder::new(Level::Debug);
        let a = SuppressibleAdapter::new(recorder.clone());
        let b = SuppressibleAdapter::new(recorder.clone());
        a.suppress();
        a.info("dropped");
        b.info("kept");
        assert_eq!(recorder.count(), 1);
    }

    #[test]
    fn test_call_site_is_the_caller() {
        let recorder = Recorder::new(Level::Debug);
        let adapter = SuppressibleAdapter::new(recorder.clone());
        let line = line!() + 1;
        adapter.info("here");
        let events = recorder.events.lock().unwrap();
        assert_eq!(events[0].source.line, line);
        assert_eq!(events[0].source.filename(), "adapter.rs");
    }
}
