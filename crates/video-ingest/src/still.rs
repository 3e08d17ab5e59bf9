//! Still-image camera backend.
//!
//! Serves a single decoded image as a live feed. Useful on machines without a
//! capture device and for replaying a photographed scene against the backend.

use std::{io, path::PathBuf};

use chrono::Utc;
use tracing::debug;

use crate::{
    CameraDevice, CameraStream,
    types::{CaptureError, DeviceError, Frame, FrameFormat, StreamMetadata, StreamRequest},
};

pub struct StillImageCamera {
    path: PathBuf,
}

impl StillImageCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

pub struct StillImageStream {
    rgb: Vec<u8>,
    width: u32,
    height: u32,
    stopped: bool,
}

impl CameraDevice for StillImageCamera {
    type Stream = StillImageStream;

    fn open(&self, request: &StreamRequest) -> Result<Self::Stream, DeviceError> {
        let shown = self.path.display().to_string();
        let bytes = std::fs::read(&self.path).map_err(|err| match err.kind() {
            io::ErrorKind::PermissionDenied => DeviceError::PermissionDenied(shown.clone()),
            io::ErrorKind::NotFound => DeviceError::NoDevice(shown.clone()),
            _ => DeviceError::DeviceBusy(format!("{shown}: {err}")),
        })?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|err| DeviceError::NoDevice(format!("{shown}: {err}")))?
            .to_rgb8();
        let (width, height) = decoded.dimensions();
        if !request.accepts(width, height) {
            return Err(DeviceError::UnsupportedResolution {
                requested_width: request.min_size.0,
                requested_height: request.min_size.1,
                width,
                height,
            });
        }
        debug!("still camera {shown} opened at {width}x{height}");
        Ok(StillImageStream {
            rgb: decoded.into_raw(),
            width,
            height,
            stopped: false,
        })
    }
}

impl CameraStream for StillImageStream {
    fn metadata(&mut self) -> Result<Option<StreamMetadata>, DeviceError> {
        Ok(Some(StreamMetadata {
            width: self.width,
            height: self.height,
        }))
    }

    fn grab(&mut self, surface: &mut Frame) -> Result<(), CaptureError> {
        if self.stopped {
            return Err(CaptureError::TrackStopped(0));
        }
        if surface.expected_len() != self.rgb.len() {
            return Err(CaptureError::SizeMismatch {
                surface_len: surface.expected_len(),
                frame_len: self.rgb.len(),
            });
        }
        surface.data.clear();
        surface.data.extend_from_slice(&self.rgb);
        surface.format = FrameFormat::Rgb8;
        surface.timestamp_ms = Utc::now().timestamp_millis();
        Ok(())
    }

    fn track_count(&self) -> usize {
        1
    }

    fn stop_track(&mut self, index: usize) -> Result<(), CaptureError> {
        if self.stopped || index != 0 {
            return Err(CaptureError::TrackStopped(index));
        }
        self.stopped = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use image::{ImageBuffer, Rgb};

    use super::*;

    fn write_image(dir: &tempfile::TempDir, width: u32, height: u32) -> PathBuf {
        let path = dir.path().join("scene.png");
        let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 7]));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn missing_file_reports_no_device() {
        let camera = StillImageCamera::new("/nonexistent/scene.png");
        let err = camera.open(&StreamRequest::default()).err().unwrap();
        assert!(matches!(err, DeviceError::NoDevice(_)));
    }

    #[test]
    fn small_image_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(&dir, 320, 240);
        let err = StillImageCamera::new(path)
            .open(&StreamRequest::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            DeviceError::UnsupportedResolution {
                width: 320,
                height: 240,
                ..
            }
        ));
    }

    #[test]
    fn grabs_into_matching_surface() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(&dir, 640, 480);
        let mut stream = StillImageCamera::new(path)
            .open(&StreamRequest::default())
            .unwrap();
        let meta = stream.metadata().unwrap().unwrap();
        assert_eq!((meta.width, meta.height), (640, 480));

        let mut surface = Frame::blank(meta.width, meta.height, FrameFormat::Rgb8);
        stream.grab(&mut surface).unwrap();
        assert_eq!(&surface.data[..3], &[0, 0, 7]);
        assert_eq!(&surface.data[3..6], &[1, 0, 7]);
    }

    #[test]
    fn second_stop_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(&dir, 640, 480);
        let mut stream = StillImageCamera::new(path)
            .open(&StreamRequest::default())
            .unwrap();
        stream.stop_track(0).unwrap();
        assert!(matches!(
            stream.stop_track(0),
            Err(CaptureError::TrackStopped(0))
        ));
        let mut surface = Frame::blank(640, 480, FrameFormat::Rgb8);
        assert!(stream.grab(&mut surface).is_err());
    }
}
