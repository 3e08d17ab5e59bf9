//! Observer seam between the session controller and whatever renders it.

use std::fmt;

use crate::protocol::CachedMeasurement;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Success,
    Error,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusLevel::Info => "info",
            StatusLevel::Success => "success",
            StatusLevel::Error => "error",
        })
    }
}

/// Which acquisition controls should be offered to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Controls {
    /// Only "start camera" is available.
    Start,
    /// "Stop" and "capture now" are available.
    Running,
}

/// Receives every state transition and tick outcome of a session.
///
/// Only `report` is required; the other hooks default to no-ops so a plain
/// status sink can be plugged in directly.
pub trait SessionView: Send + Sync + 'static {
    fn report(&self, message: &str, level: StatusLevel);

    /// `Some` shows the latest accepted measurement, `None` hides the panel.
    fn measurement(&self, _measurement: Option<&CachedMeasurement>) {}

    fn controls(&self, _controls: Controls) {}

    /// Called with each encoded frame while the stream is attached.
    fn preview_frame(&self, _jpeg: &[u8]) {}

    fn preview_attached(&self, _attached: bool) {}

    /// Annotated image the backend returned with an accepted detection.
    fn annotated_frame(&self, _image: &[u8]) {}
}
