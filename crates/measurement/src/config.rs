//! Configuration for measurement sessions.
//!
//! This module owns translation of CLI arguments into a `SessionConfig`
//! which the controller uses without re-parsing flags.

use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use clap::{Args, ValueEnum};
use video_ingest::{FacingMode, StreamRequest};

use crate::marker::DEFAULT_MARKER_SIDE_CM;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 500;
pub const DEFAULT_AUTO_STOP_MS: u64 = 2_000;
pub const DEFAULT_METADATA_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_JPEG_QUALITY: u8 = 80;
const MIN_TICK_INTERVAL_MS: u64 = 50;
const METADATA_POLL_MS: u64 = 50;

#[derive(Clone, Debug)]
/// Canonical configuration for one measurement controller.
pub struct SessionConfig {
    /// Constraints passed to the camera when a session starts.
    pub request: StreamRequest,
    /// Period of the capture-encode-submit cycle.
    pub tick_interval: Duration,
    /// Delay between the first accepted detection and the automatic stop.
    pub auto_stop_delay: Duration,
    /// How long to wait for the stream to report its dimensions.
    pub metadata_timeout: Duration,
    pub metadata_poll: Duration,
    /// JPEG quality for submitted frames (1-100).
    pub jpeg_quality: u8,
    /// Ask the backend for its annotated visualization of each frame.
    pub want_visualization: bool,
    /// Initial marker side length in centimeters.
    pub marker_side_cm: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request: StreamRequest::default(),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            auto_stop_delay: Duration::from_millis(DEFAULT_AUTO_STOP_MS),
            metadata_timeout: Duration::from_millis(DEFAULT_METADATA_TIMEOUT_MS),
            metadata_poll: Duration::from_millis(METADATA_POLL_MS),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            want_visualization: false,
            marker_side_cm: DEFAULT_MARKER_SIDE_CM,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FacingArg {
    User,
    Environment,
}

impl From<FacingArg> for FacingMode {
    fn from(arg: FacingArg) -> Self {
        match arg {
            FacingArg::User => FacingMode::User,
            FacingArg::Environment => FacingMode::Environment,
        }
    }
}

/// Session flags shared by the commands that open the camera.
#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    /// Milliseconds between captured frames.
    #[arg(long = "interval-ms", value_name = "MS", default_value_t = DEFAULT_TICK_INTERVAL_MS)]
    pub interval_ms: u64,
    /// Milliseconds to keep measuring after the first successful detection.
    #[arg(long = "auto-stop-ms", value_name = "MS", default_value_t = DEFAULT_AUTO_STOP_MS)]
    pub auto_stop_ms: u64,
    /// Milliseconds to wait for the camera to report its resolution.
    #[arg(long = "camera-timeout-ms", value_name = "MS", default_value_t = DEFAULT_METADATA_TIMEOUT_MS)]
    pub camera_timeout_ms: u64,
    /// JPEG quality used for submitted frames (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = DEFAULT_JPEG_QUALITY)]
    pub jpeg_quality: u8,
    /// Minimum acceptable camera resolution.
    #[arg(long = "min-size", value_name = "WxH", default_value = "640x480", value_parser = parse_size)]
    pub min_size: (u32, u32),
    /// Preferred camera resolution.
    #[arg(long = "ideal-size", value_name = "WxH", default_value = "1280x720", value_parser = parse_size)]
    pub ideal_size: (u32, u32),
    /// Preferred camera direction.
    #[arg(long = "facing", value_enum, default_value_t = FacingArg::Environment)]
    pub facing: FacingArg,
    /// Side length of the printed marker in centimeters.
    #[arg(long = "marker-cm", value_name = "CM", default_value_t = DEFAULT_MARKER_SIDE_CM)]
    pub marker_cm: f64,
    /// Request the backend's annotated visualization with each detection.
    #[arg(long = "visualize", action = clap::ArgAction::SetTrue)]
    pub visualize: bool,
}

impl TryFrom<SessionArgs> for SessionConfig {
    type Error = anyhow::Error;

    fn try_from(args: SessionArgs) -> Result<Self> {
        if args.interval_ms < MIN_TICK_INTERVAL_MS {
            bail!("--interval-ms must be at least {MIN_TICK_INTERVAL_MS}");
        }
        if args.camera_timeout_ms == 0 {
            bail!("--camera-timeout-ms must be positive");
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        if args.min_size.0 > args.ideal_size.0 || args.min_size.1 > args.ideal_size.1 {
            bail!("--min-size must not exceed --ideal-size");
        }
        if !(args.marker_cm.is_finite() && args.marker_cm > 0.0) {
            bail!("--marker-cm must be a positive number");
        }

        Ok(Self {
            request: StreamRequest {
                facing: args.facing.into(),
                min_size: args.min_size,
                ideal_size: args.ideal_size,
            },
            tick_interval: Duration::from_millis(args.interval_ms),
            auto_stop_delay: Duration::from_millis(args.auto_stop_ms),
            metadata_timeout: Duration::from_millis(args.camera_timeout_ms),
            metadata_poll: Duration::from_millis(METADATA_POLL_MS),
            jpeg_quality: args.jpeg_quality,
            want_visualization: args.visualize,
            marker_side_cm: args.marker_cm,
        })
    }
}

/// Parse `WIDTHxHEIGHT`.
fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT, got {value:?}"))?;
    let width: u32 = w.trim().parse().map_err(|_| anyhow!("invalid width {w:?}"))?;
    let height: u32 = h.trim().parse().map_err(|_| anyhow!("invalid height {h:?}"))?;
    if width == 0 || height == 0 {
        bail!("dimensions must be positive");
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        session: SessionArgs,
    }

    fn parse(args: &[&str]) -> Result<SessionConfig> {
        let harness = Harness::try_parse_from(std::iter::once("test").chain(args.iter().copied()))?;
        SessionConfig::try_from(harness.session)
    }

    #[test]
    fn defaults_match_controller_defaults() {
        let config = parse(&[]).unwrap();
        let defaults = SessionConfig::default();
        assert_eq!(config.tick_interval, defaults.tick_interval);
        assert_eq!(config.auto_stop_delay, defaults.auto_stop_delay);
        assert_eq!(config.metadata_timeout, defaults.metadata_timeout);
        assert_eq!(config.request, defaults.request);
        assert_eq!(config.jpeg_quality, 80);
    }

    #[test]
    fn sizes_and_facing_are_parsed() {
        let config = parse(&["--min-size", "320x240", "--ideal-size", "1920X1080", "--facing", "user"])
            .unwrap();
        assert_eq!(config.request.min_size, (320, 240));
        assert_eq!(config.request.ideal_size, (1920, 1080));
        assert_eq!(config.request.facing, FacingMode::User);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(parse(&["--jpeg-quality", "0"]).is_err());
        assert!(parse(&["--interval-ms", "10"]).is_err());
        assert!(parse(&["--min-size", "1920x1080"]).is_err());
        assert!(parse(&["--marker-cm", "-2"]).is_err());
        assert!(parse(&["--ideal-size", "wide"]).is_err());
    }
}
