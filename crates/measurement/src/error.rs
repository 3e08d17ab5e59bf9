use std::time::Duration;

use thiserror::Error;
use video_ingest::{CaptureError, DeviceError};

/// Failures surfaced by the measurement session to its caller.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("camera metadata did not arrive within {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("detection failed: {0}")]
    Detection(String),
    #[error("frame capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("a measurement session is already running")]
    AlreadyActive,
    #[error("no camera session is active")]
    NotActive,
    #[error("session was stopped before the camera became ready")]
    Cancelled,
}

impl SessionError {
    /// Short text suitable for the status line.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Device(DeviceError::PermissionDenied(_)) => {
                "Camera permission denied. Allow camera access and try again.".into()
            }
            SessionError::Device(DeviceError::NoDevice(_)) => "No camera was found.".into(),
            SessionError::Device(DeviceError::DeviceBusy(_)) => {
                "The camera is being used by another application.".into()
            }
            SessionError::Device(DeviceError::UnsupportedResolution { .. }) => {
                "The camera does not support the requested resolution.".into()
            }
            SessionError::Timeout(_) => "Timed out waiting for the camera to load.".into(),
            SessionError::Transport(_) => "Error processing the image on the server.".into(),
            SessionError::Detection(message) => message.clone(),
            SessionError::Capture(_) | SessionError::Encode(_) => {
                "Error capturing the camera frame.".into()
            }
            SessionError::AlreadyActive => "The camera is already running.".into(),
            SessionError::NotActive => "Start the camera first.".into(),
            SessionError::Cancelled => "Camera start was cancelled.".into(),
        }
    }
}

/// The request never produced a well-formed reply.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend answered HTTP {0}")]
    Status(u16),
    #[error("malformed reply: {0}")]
    Protocol(String),
}

/// The capture surface could not be turned into a JPEG.
#[derive(Debug, Error)]
#[error("frame encoding failed: {0}")]
pub struct EncodeError(pub String);

/// Failures of the layout and profile calls used by the calculator.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Rejected(String),
}
