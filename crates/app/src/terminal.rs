//! Terminal rendering of session updates and parsing of interactive commands.

use std::sync::Arc;

use measurement::{CachedMeasurement, Controls, SessionView, StatusLevel};

use crate::preview::PreviewState;

pub const COMMAND_HELP: &str =
    "commands: c = capture now, s = stop, m <cm> = marker side, manual = switch to manual input, q = quit";

/// Prints status to stdout and mirrors it into the preview state.
pub struct TerminalView {
    preview: Arc<PreviewState>,
}

impl TerminalView {
    pub fn new(preview: Arc<PreviewState>) -> Self {
        Self { preview }
    }
}

impl SessionView for TerminalView {
    fn report(&self, message: &str, level: StatusLevel) {
        println!("{}", format_status(message, level));
        self.preview.set_status(message, level);
    }

    fn measurement(&self, measurement: Option<&CachedMeasurement>) {
        if let Some(cached) = measurement {
            println!("{}", format_measurement(cached));
        }
        self.preview.set_measurement(measurement);
    }

    fn controls(&self, controls: Controls) {
        if controls == Controls::Running {
            println!("{COMMAND_HELP}");
        }
        self.preview.set_controls(controls);
    }

    fn preview_frame(&self, jpeg: &[u8]) {
        self.preview.set_frame(jpeg);
    }

    fn preview_attached(&self, attached: bool) {
        self.preview.set_attached(attached);
    }

    fn annotated_frame(&self, image: &[u8]) {
        self.preview.set_annotated(image);
    }
}

pub fn format_status(message: &str, level: StatusLevel) -> String {
    let tag = match level {
        StatusLevel::Info => "..",
        StatusLevel::Success => "ok",
        StatusLevel::Error => "!!",
    };
    format!("[{tag}] {message}")
}

pub fn format_measurement(cached: &CachedMeasurement) -> String {
    let mut line = format!("     {}", cached.measurement);
    if let Some(confidence) = cached.confidence {
        line.push_str(&format!(" | confidence {:.0}%", confidence * 100.0));
    }
    if let Some(method) = &cached.method {
        line.push_str(&format!(" | {method}"));
    }
    line
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Capture,
    Stop,
    Marker(f64),
    Manual,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Command::Empty;
        };
        match (head, words.next(), words.next()) {
            ("c", None, _) => Command::Capture,
            ("s", None, _) => Command::Stop,
            ("q", None, _) => Command::Quit,
            ("manual", None, _) => Command::Manual,
            ("m", Some(value), None) => match value.parse::<f64>() {
                Ok(cm) => Command::Marker(cm),
                Err(_) => Command::Unknown(line.trim().to_string()),
            },
            _ => Command::Unknown(line.trim().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use measurement::Measurement;

    use super::*;

    #[test]
    fn parses_interactive_commands() {
        assert_eq!(Command::parse("c"), Command::Capture);
        assert_eq!(Command::parse("  s "), Command::Stop);
        assert_eq!(Command::parse("m 7.5"), Command::Marker(7.5));
        assert_eq!(Command::parse("manual"), Command::Manual);
        assert_eq!(Command::parse("q"), Command::Quit);
        assert_eq!(Command::parse(""), Command::Empty);
        assert_eq!(
            Command::parse("m seven"),
            Command::Unknown("m seven".into())
        );
        assert_eq!(Command::parse("c now"), Command::Unknown("c now".into()));
    }

    #[test]
    fn view_mirrors_into_preview_state() {
        let preview = Arc::new(PreviewState::default());
        let view = TerminalView::new(preview.clone());

        view.preview_frame(&[1, 2, 3]);
        assert!(preview.frame().is_none());

        view.preview_attached(true);
        view.preview_frame(&[1, 2, 3]);
        view.controls(Controls::Running);
        view.report("no marker detected", StatusLevel::Error);

        assert_eq!(preview.frame(), Some(vec![1, 2, 3]));
        let status = preview.status();
        assert_eq!(status.message, "no marker detected");
        assert_eq!(status.level, "error");
        assert_eq!(status.controls, "running");

        view.annotated_frame(&[0xFF, 0xD8]);
        view.preview_attached(false);
        assert!(preview.frame().is_none());
        assert_eq!(preview.annotated(), Some(vec![0xFF, 0xD8]));
    }

    #[test]
    fn measurement_line_includes_extras() {
        let line = format_measurement(&CachedMeasurement {
            measurement: Measurement::Distance {
                distance: 3.0,
                area: 12.5,
            },
            confidence: Some(0.914),
            method: Some("multipunto".into()),
            captured_at: Utc::now(),
        });
        assert!(line.contains("Distance measured: 3 m | Area: 12.5 m²"));
        assert!(line.contains("confidence 91%"));
        assert!(line.ends_with("multipunto"));
        assert_eq!(
            format_status("Camera stopped.", StatusLevel::Info),
            "[..] Camera stopped."
        );
    }
}
