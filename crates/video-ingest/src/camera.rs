//! OpenCV-backed camera capture.

use std::path::Path;

use chrono::Utc;
use opencv::{
    core::{self, Mat, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture},
};
use tracing::{debug, warn};

use crate::{
    CameraDevice, CameraStream, parse_device_index,
    types::{CaptureError, DeviceError, Frame, FrameFormat, StreamMetadata, StreamRequest},
};

/// Capture device addressed by index, `/dev/videoN` path, or URI.
pub struct OpenCvCamera {
    uri: String,
}

impl OpenCvCamera {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

pub struct OpenCvStream {
    cap: VideoCapture,
    request: StreamRequest,
    scratch: Mat,
    resized: Mat,
    released: bool,
}

impl CameraDevice for OpenCvCamera {
    type Stream = OpenCvStream;

    fn open(&self, request: &StreamRequest) -> Result<Self::Stream, DeviceError> {
        check_device_node(&self.uri)?;
        let mut cap = open_video_capture(&self.uri)?;
        configure_camera(&mut cap, request.ideal_size);
        Ok(OpenCvStream {
            cap,
            request: *request,
            scratch: Mat::default(),
            resized: Mat::default(),
            released: false,
        })
    }
}

impl CameraStream for OpenCvStream {
    fn metadata(&mut self) -> Result<Option<StreamMetadata>, DeviceError> {
        let width = self
            .cap
            .get(videoio::CAP_PROP_FRAME_WIDTH)
            .map_err(|e| DeviceError::DeviceBusy(e.to_string()))? as u32;
        let height = self
            .cap
            .get(videoio::CAP_PROP_FRAME_HEIGHT)
            .map_err(|e| DeviceError::DeviceBusy(e.to_string()))? as u32;
        if width == 0 || height == 0 {
            return Ok(None);
        }
        if !self.request.accepts(width, height) {
            return Err(DeviceError::UnsupportedResolution {
                requested_width: self.request.min_size.0,
                requested_height: self.request.min_size.1,
                width,
                height,
            });
        }
        Ok(Some(StreamMetadata { width, height }))
    }

    fn grab(&mut self, surface: &mut Frame) -> Result<(), CaptureError> {
        if self.released {
            return Err(CaptureError::TrackStopped(0));
        }
        let ok = self
            .cap
            .read(&mut self.scratch)
            .map_err(|e| CaptureError::Other(e.into()))?;
        let size = self
            .scratch
            .size()
            .map_err(|e| CaptureError::Other(e.into()))?;
        if !ok || size.width <= 0 {
            return Err(CaptureError::Other(anyhow::anyhow!("camera returned an empty frame")));
        }

        let target_w = surface.width as i32;
        let target_h = surface.height as i32;
        let working = if size.width != target_w || size.height != target_h {
            opencv::imgproc::resize(
                &self.scratch,
                &mut self.resized,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &self.resized
        } else {
            &self.scratch
        };

        let bytes = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?;
        if bytes.len() != surface.expected_len() {
            return Err(CaptureError::SizeMismatch {
                surface_len: surface.expected_len(),
                frame_len: bytes.len(),
            });
        }
        surface.data.clear();
        surface.data.extend_from_slice(bytes);
        surface.format = FrameFormat::Bgr8;
        surface.timestamp_ms = Utc::now().timestamp_millis();
        Ok(())
    }

    fn track_count(&self) -> usize {
        1
    }

    fn stop_track(&mut self, index: usize) -> Result<(), CaptureError> {
        if self.released || index != 0 {
            return Err(CaptureError::TrackStopped(index));
        }
        self.released = true;
        self.cap
            .release()
            .map_err(|e| CaptureError::Other(e.into()))
    }
}

/// Classify `/dev/videoN` nodes before handing them to OpenCV, which only
/// reports a generic failure.
fn check_device_node(uri: &str) -> Result<(), DeviceError> {
    let node = match parse_device_index(uri) {
        Some(index) => format!("/dev/video{index}"),
        None => return Ok(()),
    };
    let path = Path::new(&node);
    if !path.exists() {
        return Err(DeviceError::NoDevice(node));
    }
    if let Err(err) = std::fs::File::open(path) {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            return Err(DeviceError::PermissionDenied(node));
        }
    }
    Ok(())
}

/// Attempt to open a camera input either by index or URI.
fn open_video_capture(uri: &str) -> Result<VideoCapture, DeviceError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().unwrap_or(false) {
                        debug!("opened camera #{index} with backend {backend}");
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open device #{index} with backend {backend}: {err}");
                }
            }
        }
        return Err(DeviceError::DeviceBusy(format!("/dev/video{index}")));
    }

    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().unwrap_or(false) {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!("failed to open {uri} with backend {backend}: {err}");
            }
        }
    }

    Err(DeviceError::NoDevice(uri.to_string()))
}

/// Apply the preferred resolution and pixel format.
fn configure_camera(cap: &mut VideoCapture, ideal: (u32, u32)) {
    let mut fourcc_set = false;
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        if matches!(cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64), Ok(true)) {
            fourcc_set = true;
        }
    }
    if !fourcc_set {
        if let Ok(yuyv) = videoio::VideoWriter::fourcc('Y', 'U', 'Y', 'V') {
            let _ = cap.set(videoio::CAP_PROP_FOURCC, yuyv as f64);
        }
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, ideal.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, ideal.1 as f64);
}
