//! Camera-driven marker measurement.
//!
//! The crate is split into focused modules:
//! - `session`: the controller owning camera lifecycle, ticking and caching.
//! - `client`: the detection backend seam and its reqwest implementation.
//! - `protocol`: wire types for the detection, layout and profile endpoints.
//! - `encoding`: JPEG + data URL encoding of the capture surface.
//! - `view`: observer hooks for status, measurement and preview updates.
//! - `config`: CLI flags and validated session configuration.
//! - `marker`: user-entered marker size read on every tick.

pub mod client;
pub mod config;
pub mod encoding;
pub mod error;
pub mod marker;
pub mod protocol;
pub mod session;
pub mod view;

pub use client::{DEFAULT_BACKEND_URL, DetectionBackend, HttpBackend};
pub use config::{SessionArgs, SessionConfig};
pub use error::{BackendError, EncodeError, SessionError, TransportError};
pub use marker::MarkerSide;
pub use protocol::{
    CachedMeasurement, DetectionExtras, DetectionReply, DetectionRequest, LayoutQuery,
    LayoutReport, Measurement, OptimizationProfile, ProfileAck,
};
pub use session::{SessionController, SessionState, TickOutcome, TickSource};
pub use view::{Controls, SessionView, StatusLevel};
