//! Camera acquisition for the measurement client.
//!
//! A [`CameraDevice`] opens a [`CameraStream`] for a [`StreamRequest`]. The
//! stream reports its negotiated size through [`CameraStream::metadata`] once
//! the driver has settled, after which frames can be grabbed into a caller
//! owned [`Frame`] surface.

#[cfg(feature = "opencv")]
mod camera;
mod still;
mod types;

#[cfg(feature = "opencv")]
pub use camera::{OpenCvCamera, OpenCvStream};
pub use still::{StillImageCamera, StillImageStream};
pub use types::{
    CaptureError, DeviceError, FacingMode, Frame, FrameFormat, StreamMetadata, StreamRequest,
};

/// Source of live camera streams.
pub trait CameraDevice: Send + Sync + 'static {
    type Stream: CameraStream;

    /// Request a stream. Permission and device availability are decided here.
    fn open(&self, request: &StreamRequest) -> Result<Self::Stream, DeviceError>;
}

/// A live capture stream exclusively owned by whoever opened it.
pub trait CameraStream: Send + 'static {
    /// Negotiated dimensions, or `None` while the stream is still warming up.
    fn metadata(&mut self) -> Result<Option<StreamMetadata>, DeviceError>;

    /// Render the current frame into `surface`.
    fn grab(&mut self, surface: &mut Frame) -> Result<(), CaptureError>;

    fn track_count(&self) -> usize;

    /// Stop one track. Stopping an already stopped track returns an error.
    fn stop_track(&mut self, index: usize) -> Result<(), CaptureError>;
}

/// Camera selector parsed from a command-line source string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraSource {
    /// `still:<path>` serves an image file as the camera feed.
    Still(std::path::PathBuf),
    /// Device index, `/dev/videoN` or any URI understood by the capture backend.
    Device(String),
}

impl CameraSource {
    pub fn from_uri(uri: &str) -> Self {
        match uri.strip_prefix("still:") {
            Some(path) => CameraSource::Still(path.into()),
            None => CameraSource::Device(uri.to_string()),
        }
    }
}

/// Parse a `/dev/videoX` style URI and return the zero-based index if present.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<i32>().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_indices() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("/dev/video2"), Some(2));
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("rtsp://cam/1"), None);
    }

    #[test]
    fn still_prefix_selects_image_source() {
        assert_eq!(
            CameraSource::from_uri("still:room.jpg"),
            CameraSource::Still("room.jpg".into())
        );
        assert_eq!(
            CameraSource::from_uri("/dev/video0"),
            CameraSource::Device("/dev/video0".into())
        );
    }

    #[test]
    fn request_enforces_minimum_size() {
        let request = StreamRequest::default();
        assert!(request.accepts(1280, 720));
        assert!(request.accepts(640, 480));
        assert!(!request.accepts(320, 240));
    }

    #[test]
    fn bgr_frames_convert_to_rgb() {
        let frame = Frame {
            data: vec![1, 2, 3, 4, 5, 6],
            width: 2,
            height: 1,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        };
        assert_eq!(frame.to_rgb(), vec![3, 2, 1, 6, 5, 4]);
    }
}
