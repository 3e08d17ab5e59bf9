//! Luminaire layout calculation on top of a measurement.

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use measurement::{
    BackendError, CachedMeasurement, HttpBackend, LayoutQuery, LayoutReport, SessionController,
    SessionState,
};
use thiserror::Error;
use tracing::info;
use video_ingest::CameraDevice;

use crate::auth::{AuthGate, FaceAuthenticator};

const FALLBACK_IMAGE_NAME: &str = "layout.png";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum InputMode {
    /// Use the last measurement taken with the camera.
    #[default]
    Camera,
    /// Use dimensions typed on the command line.
    Manual,
}

#[derive(Args, Clone, Debug, Default)]
pub struct ManualArgs {
    /// Distance between the markers, in meters.
    #[arg(long, conflicts_with_all = ["base", "height"])]
    pub distance: Option<f64>,
    /// Room base, in meters.
    #[arg(long, requires = "height")]
    pub base: Option<f64>,
    /// Room height, in meters.
    #[arg(long, requires = "base")]
    pub height: Option<f64>,
}

impl ManualArgs {
    pub fn input(&self) -> Option<ManualInput> {
        match (self.distance, self.base, self.height) {
            (Some(distance), _, _) => Some(ManualInput::Distance(distance)),
            (None, Some(base), Some(height)) => Some(ManualInput::Rectangle { base, height }),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ManualInput {
    Distance(f64),
    Rectangle { base: f64, height: f64 },
}

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("authenticate before using the calculator")]
    NotAuthenticated,
    #[error("measure the distance with the camera first")]
    NoMeasurement,
    #[error("enter a distance, or a base and height, for manual input")]
    MissingInput,
    #[error("{field} must be a number greater than 0 (got {value})")]
    Invalid { field: &'static str, value: f64 },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// What the calculator needs to know about a running camera session.
pub trait SessionHandle {
    fn is_running(&self) -> bool;
    fn stop(&self);
}

impl<C: CameraDevice> SessionHandle for SessionController<C> {
    fn is_running(&self) -> bool {
        self.state() != SessionState::Idle
    }

    fn stop(&self) {
        SessionController::stop(self);
    }
}

pub struct Calculator<A> {
    gate: AuthGate<A>,
    mode: InputMode,
}

impl<A: FaceAuthenticator> Calculator<A> {
    pub fn new(gate: AuthGate<A>, mode: InputMode) -> Self {
        Self { gate, mode }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn gate(&self) -> &AuthGate<A> {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut AuthGate<A> {
        &mut self.gate
    }

    /// Switch input mode. A running camera session is stopped on any switch.
    /// Returns whether a session was stopped.
    pub fn set_mode(&mut self, mode: InputMode, session: &dyn SessionHandle) -> bool {
        if mode == self.mode {
            return false;
        }
        self.mode = mode;
        if session.is_running() {
            session.stop();
            return true;
        }
        false
    }

    /// Validate the inputs for the current mode and build the backend query.
    pub fn resolve(
        &self,
        cached: Option<&CachedMeasurement>,
        manual: Option<ManualInput>,
    ) -> Result<LayoutQuery, LayoutError> {
        if !self.gate.is_authenticated() {
            return Err(LayoutError::NotAuthenticated);
        }
        let query = match self.mode {
            InputMode::Camera => {
                LayoutQuery::from(cached.ok_or(LayoutError::NoMeasurement)?.measurement)
            }
            InputMode::Manual => match manual.ok_or(LayoutError::MissingInput)? {
                ManualInput::Distance(distance) => LayoutQuery::Distance(distance),
                ManualInput::Rectangle { base, height } => LayoutQuery::Rectangle { base, height },
            },
        };
        match query {
            LayoutQuery::Distance(distance) => {
                positive("distance", distance)?;
            }
            LayoutQuery::Rectangle { base, height } => {
                positive("base", base)?;
                positive("height", height)?;
            }
        }
        Ok(query)
    }

    pub async fn calculate(
        &self,
        backend: &HttpBackend,
        cached: Option<&CachedMeasurement>,
        manual: Option<ManualInput>,
    ) -> Result<LayoutReport, LayoutError> {
        let query = self.resolve(cached, manual)?;
        info!("requesting layout for {query:?}");
        Ok(backend.layout(query).await?)
    }
}

fn positive(field: &'static str, value: f64) -> Result<f64, LayoutError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(LayoutError::Invalid { field, value })
    }
}

pub fn render_report(report: &LayoutReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Area:                 {} m²", report.area);
    let _ = writeln!(out, "Luminaires needed:    {}", report.nl);
    let _ = writeln!(out, "Grid:                 {} x {}", report.x, report.y);
    let _ = writeln!(out, "Luminaires placed:    {}", report.total);
    let _ = write!(out, "Distribution image:   {}", report.image_url);
    out
}

fn image_file_name(image_url: &str) -> &str {
    let path = image_url.split(['?', '#']).next().unwrap_or_default();
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(FALLBACK_IMAGE_NAME)
}

/// Download the distribution image into `dir`, returning the written path.
pub async fn download_image(
    backend: &HttpBackend,
    report: &LayoutReport,
    dir: &Path,
) -> Result<PathBuf> {
    let bytes = backend
        .fetch_image(&report.image_url)
        .await
        .with_context(|| format!("failed to download {}", report.image_url))?;
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(image_file_name(&report.image_url));
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use chrono::Utc;
    use measurement::Measurement;

    use super::*;
    use crate::auth::{AuthError, AuthErrorCode, AuthOptions, EnrollOptions, UserData, UserInfo};

    struct AnyoneAuthenticator;

    impl FaceAuthenticator for AnyoneAuthenticator {
        fn enroll(&self, options: EnrollOptions) -> Result<UserInfo, AuthError> {
            Err(AuthError::new(AuthErrorCode::Unavailable, options.name))
        }

        fn authenticate(&self, options: AuthOptions) -> Result<UserData, AuthError> {
            Ok(UserData {
                id: "op-1".into(),
                name: options.name,
                authenticated_at: Utc::now(),
            })
        }
    }

    #[derive(Default)]
    struct FakeSession {
        running: Cell<bool>,
        stops: Cell<usize>,
    }

    impl SessionHandle for FakeSession {
        fn is_running(&self) -> bool {
            self.running.get()
        }

        fn stop(&self) {
            self.running.set(false);
            self.stops.set(self.stops.get() + 1);
        }
    }

    fn calculator(mode: InputMode, logged_in: bool) -> Calculator<AnyoneAuthenticator> {
        let mut gate = AuthGate::new(AnyoneAuthenticator);
        if logged_in {
            gate.login(AuthOptions { name: "ana".into() }).unwrap();
        }
        Calculator::new(gate, mode)
    }

    fn cached(measurement: Measurement) -> CachedMeasurement {
        CachedMeasurement {
            measurement,
            confidence: None,
            method: None,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn requires_authentication() {
        let calc = calculator(InputMode::Manual, false);
        let err = calc
            .resolve(None, Some(ManualInput::Distance(3.0)))
            .unwrap_err();
        assert_eq!(err.to_string(), "authenticate before using the calculator");
    }

    #[test]
    fn camera_mode_needs_a_measurement() {
        let calc = calculator(InputMode::Camera, true);
        let err = calc.resolve(None, Some(ManualInput::Distance(3.0))).unwrap_err();
        assert!(matches!(err, LayoutError::NoMeasurement));
        assert_eq!(err.to_string(), "measure the distance with the camera first");
    }

    #[test]
    fn camera_mode_uses_the_cached_measurement() {
        let calc = calculator(InputMode::Camera, true);
        let distance = cached(Measurement::Distance {
            distance: 3.0,
            area: 9.0,
        });
        assert_eq!(
            calc.resolve(Some(&distance), None).unwrap(),
            LayoutQuery::Distance(3.0)
        );
        let rect = cached(Measurement::Rectangle {
            base: 4.0,
            height: 2.5,
            area: 10.0,
        });
        assert_eq!(
            calc.resolve(Some(&rect), None).unwrap(),
            LayoutQuery::Rectangle {
                base: 4.0,
                height: 2.5
            }
        );
    }

    #[test]
    fn manual_values_must_be_positive_and_finite() {
        let calc = calculator(InputMode::Manual, true);
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = calc
                .resolve(None, Some(ManualInput::Distance(bad)))
                .unwrap_err();
            assert!(matches!(err, LayoutError::Invalid { field: "distance", .. }));
        }
        let err = calc
            .resolve(
                None,
                Some(ManualInput::Rectangle {
                    base: 4.0,
                    height: 0.0,
                }),
            )
            .unwrap_err();
        assert!(matches!(err, LayoutError::Invalid { field: "height", .. }));
        assert!(matches!(
            calc.resolve(None, None),
            Err(LayoutError::MissingInput)
        ));
    }

    #[test]
    fn switching_mode_stops_a_running_session() {
        let mut calc = calculator(InputMode::Camera, true);
        let session = FakeSession::default();
        session.running.set(true);

        assert!(!calc.set_mode(InputMode::Camera, &session));
        assert_eq!(session.stops.get(), 0);

        assert!(calc.set_mode(InputMode::Manual, &session));
        assert_eq!(session.stops.get(), 1);
        assert_eq!(calc.mode(), InputMode::Manual);

        assert!(!calc.set_mode(InputMode::Camera, &session));
        assert_eq!(session.stops.get(), 1);
    }

    #[test]
    fn manual_args_pick_the_query_shape() {
        let args = ManualArgs {
            distance: None,
            base: Some(4.0),
            height: Some(2.5),
        };
        assert_eq!(
            args.input(),
            Some(ManualInput::Rectangle {
                base: 4.0,
                height: 2.5
            })
        );
        assert_eq!(ManualArgs::default().input(), None);
    }

    #[test]
    fn report_lists_every_field() {
        let text = render_report(&LayoutReport {
            area: 9.0,
            nl: 4.2,
            x: 2,
            y: 3,
            total: 6,
            image_url: "/static/luminarias_300cm.png".into(),
        });
        assert!(text.contains("9 m²"));
        assert!(text.contains("4.2"));
        assert!(text.contains("2 x 3"));
        assert!(text.contains("placed:    6"));
        assert!(text.ends_with("/static/luminarias_300cm.png"));
    }

    #[test]
    fn image_names_come_from_the_url_path() {
        assert_eq!(
            image_file_name("/static/luminarias_300cm.png?v=2"),
            "luminarias_300cm.png"
        );
        assert_eq!(image_file_name("/"), FALLBACK_IMAGE_NAME);
    }
}
