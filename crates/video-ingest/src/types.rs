use anyhow::Error;
use chrono::Utc;
use thiserror::Error;

/// Raw frame captured from a video source.
///
/// The controller keeps one of these as its capture surface: it is allocated
/// once the stream reports its negotiated size and rewritten on every grab.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Rgb8,
    Bgr8,
}

impl FrameFormat {
    pub fn bytes_per_pixel(self) -> usize {
        3
    }
}

impl Frame {
    /// Allocate a zeroed surface matching the given dimensions.
    pub fn blank(width: u32, height: u32, format: FrameFormat) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            data: vec![0; len],
            width,
            height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format,
        }
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// Return the pixels as RGB, swapping channels when the source is BGR.
    pub fn to_rgb(&self) -> Vec<u8> {
        match self.format {
            FrameFormat::Rgb8 => self.data.clone(),
            FrameFormat::Bgr8 => {
                let mut rgb = self.data.clone();
                for px in rgb.chunks_exact_mut(3) {
                    px.swap(0, 2);
                }
                rgb
            }
        }
    }
}

/// Camera direction preference passed along with a stream request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FacingMode {
    User,
    #[default]
    Environment,
}

/// Resolution constraints for a new stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamRequest {
    pub facing: FacingMode,
    pub min_size: (u32, u32),
    pub ideal_size: (u32, u32),
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            facing: FacingMode::Environment,
            min_size: (640, 480),
            ideal_size: (1280, 720),
        }
    }
}

impl StreamRequest {
    pub fn accepts(&self, width: u32, height: u32) -> bool {
        width >= self.min_size.0 && height >= self.min_size.1
    }
}

/// Dimensions negotiated with the device once the stream is live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamMetadata {
    pub width: u32,
    pub height: u32,
}

/// Reasons a camera stream could not be acquired.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("camera access was denied: {0}")]
    PermissionDenied(String),
    #[error("no camera found: {0}")]
    NoDevice(String),
    #[error("camera is busy: {0}")]
    DeviceBusy(String),
    #[error("camera cannot deliver {requested_width}x{requested_height} (got {width}x{height})")]
    UnsupportedResolution {
        requested_width: u32,
        requested_height: u32,
        width: u32,
        height: u32,
    },
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("track {0} already stopped")]
    TrackStopped(usize),
    #[error("frame size mismatch: surface {surface_len} bytes, frame {frame_len} bytes")]
    SizeMismatch { surface_len: usize, frame_len: usize },
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Other(#[from] Error),
}
