//! Text rendering of log events.
//!
//! Format strings use `{placeholder}` syntax. Recognised placeholders are
//! `{timestamp}`, `{name}`, `{level}`, `{message}`, `{file}`, `{line}`,
//! `{module}` and `{thread}`; anything else is copied through verbatim.

use std::collections::HashMap;

use colored::{Color, Colorize};

use super::{Level, LogEvent};

/// Default layout: `[timestamp] [logger] [LEVEL] message`.
pub const DEFAULT_FORMAT: &str = "[{timestamp}] [{name}] [{level}] {message}";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Renders a [`LogEvent`] to a single line of text.
pub trait Format: Send + Sync {
    fn format(&self, event: &LogEvent) -> String;
}

/// Plain placeholder substitution.
#[derive(Debug, Clone)]
pub struct PatternFormatter {
    pattern: String,
}

impl PatternFormatter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Render with an explicit level label, so decorators can substitute a
    /// styled label without touching the event.
    pub fn render(&self, event: &LogEvent, level_label: &str) -> String {
        let mut out = String::with_capacity(self.pattern.len() + event.message.len());
        let mut rest = self.pattern.as_str();

        // Single pass, so text substituted from the event is never rescanned.
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                out.push_str(&rest[open..]);
                return out;
            };
            let placeholder = &after[..close];
            match placeholder {
                "timestamp" => out.push_str(&event.timestamp.format(TIMESTAMP_FORMAT).to_string()),
                "name" => out.push_str(&event.logger),
                "level" => out.push_str(level_label),
                "message" => out.push_str(&event.message),
                "file" => out.push_str(event.source.filename()),
                "line" => out.push_str(&event.source.line.to_string()),
                "module" => out.push_str(event.source.module()),
                "thread" => out.push_str(event.thread.name.as_deref().unwrap_or(&event.thread.id)),
                _ => {
                    out.push('{');
                    out.push_str(placeholder);
                    out.push('}');
                }
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        out
    }
}

impl Default for PatternFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_FORMAT)
    }
}

impl Format for PatternFormatter {
    fn format(&self, event: &LogEvent) -> String {
        self.render(event, event.level.label())
    }
}

/// Wraps the level label in an ANSI colour escape before substitution.
///
/// Labels missing from the palette are rendered unmodified. Escapes follow
/// `colored`'s terminal detection, so `NO_COLOR` or a redirected stdout
/// yields plain labels unless `colored::control::set_override` forces them.
#[derive(Debug, Clone)]
pub struct ColourFormatter {
    inner: PatternFormatter,
    palette: HashMap<String, Color>,
}

impl ColourFormatter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            inner: PatternFormatter::new(pattern),
            palette: default_palette(),
        }
    }

    /// Replace the colour table. Keys are level labels (`"INFO"`).
    pub fn with_palette(mut self, palette: HashMap<String, Color>) -> Self {
        self.palette = palette;
        self
    }

    pub fn colourise(&self, label: &str) -> String {
        match self.palette.get(label) {
            Some(colour) => label.color(*colour).to_string(),
            None => label.to_string(),
        }
    }
}

impl Format for ColourFormatter {
    fn format(&self, event: &LogEvent) -> String {
        let label = self.colourise(event.level.label());
        self.inner.render(event, &label)
    }
}

/// DEBUG cyan, INFO green, WARNING yellow, ERROR red, CRITICAL bright red.
pub fn default_palette() -> HashMap<String, Color> {
    [
        (Level::Debug, Color::Cyan),
        (Level::Info, Color::Green),
        (Level::Warning, Color::Yellow),
        (Level::Error, Color::Red),
        (Level::Critical, Color::BrightRed),
    ]
    .into_iter()
    .map(|(level, colour)| (level.label().to_string(), colour))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::Location;

    fn event(level: Level, message: &str) -> LogEvent {
        LogEvent::capture("Requester", level, message.to_string(), Location::caller())
    }

    #[test]
    fn test_pattern_substitutes_placeholders() {
        let formatter = PatternFormatter::new("[{name}] [{level}] {message} ({module}:{line})");
        let rendered = formatter.format(&event(Level::Warning, "slow upstream"));
        assert!(rendered.starts_with("[Requester] [WARNING] slow upstream (format:"));
    }

    #[test]
    fn test_default_pattern_includes_timestamp() {
        let e = event(Level::Info, "hi");
        let rendered = PatternFormatter::default().format(&e);
        let stamp = e.timestamp.format(TIMESTAMP_FORMAT).to_string();
        assert_eq!(rendered, format!("[{stamp}] [Requester] [INFO] hi"));
    }

    #[test]
    fn test_message_braces_are_not_rescanned() {
        let formatter = PatternFormatter::new("{level}: {message}");
        let rendered = formatter.format(&event(Level::Info, "payload {level} {\"a\":1}"));
        assert_eq!(rendered, "INFO: payload {level} {\"a\":1}");
    }

    #[test]
    fn test_unknown_placeholder_and_unclosed_brace_pass_through() {
        let formatter = PatternFormatter::new("{pid} {message} {oops");
        assert_eq!(formatter.format(&event(Level::Info, "m")), "{pid} m {oops");
    }

    #[test]
    fn test_info_is_wrapped_in_green() {
        colored::control::set_override(true);
        let formatter = ColourFormatter::new("{level}");
        let rendered = formatter.format(&event(Level::Info, "x"));
        assert_eq!(rendered, "\x1b[32mINFO\x1b[0m");
    }

    #[test]
    fn test_every_level_has_a_default_colour() {
        colored::control::set_override(true);
        let formatter = ColourFormatter::new("{level}");
        let expected = [
            (Level::Debug, "36"),
            (Level::Info, "32"),
            (Level::Warning, "33"),
            (Level::Error, "31"),
            (Level::Critical, "91"),
        ];
        for (level, code) in expected {
            let rendered = formatter.format(&event(level, "x"));
            assert_eq!(rendered, format!("\x1b[{code}m{}\x1b[0m", level.label()));
        }
    }

    #[test]
    fn test_label_missing_from_palette_is_unmodified() {
        colored::control::set_override(true);
        let palette = HashMap::from([("ERROR".to_string(), Color::Red)]);
        let formatter = ColourFormatter::new("[{level}] {message}").with_palette(palette);
        assert_eq!(formatter.format(&event(Level::Info, "ok")), "[INFO] ok");
        assert_eq!(formatter.colourise("NOTICE"), "NOTICE");
        assert_eq!(
            formatter.format(&event(Level::Error, "bad")),
            "[\x1b[31mERROR\x1b[0m] bad"
        );
    }

    #[test]
    fn test_colour_does_not_leak_into_message() {
        colored::control::set_override(true);
        let formatter = ColourFormatter::new("{level} {message}");
        let rendered = formatter.format(&event(Level::Debug, "INFO"));
        assert!(rendered.ends_with(" INFO"));
    }
}
