//! Actix Web preview server exposing the latest captured frame and session status.
//!
//! The server runs on a dedicated thread with its own actix system so the
//! measurement runtime never depends on it.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use actix_web::{App, HttpResponse, HttpServer, web};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use measurement::{CachedMeasurement, Controls, Measurement, StatusLevel};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::telemetry::spawn_thread;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MeasurementSnapshot {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    pub area: f64,
    pub confidence: Option<f64>,
    pub method: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl From<&CachedMeasurement> for MeasurementSnapshot {
    fn from(cached: &CachedMeasurement) -> Self {
        let (kind, distance, base, height) = match cached.measurement {
            Measurement::Distance { distance, .. } => ("distance", Some(distance), None, None),
            Measurement::Rectangle { base, height, .. } => {
                ("rectangle", None, Some(base), Some(height))
            }
        };
        Self {
            kind,
            distance,
            base,
            height,
            area: cached.measurement.area(),
            confidence: cached.confidence,
            method: cached.method.clone(),
            captured_at: cached.captured_at,
        }
    }
}

/// Body of `GET /status`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub message: String,
    pub level: String,
    pub controls: &'static str,
    pub attached: bool,
    pub measurement: Option<MeasurementSnapshot>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            message: String::new(),
            level: StatusLevel::Info.to_string(),
            controls: controls_name(Controls::Start),
            attached: false,
            measurement: None,
        }
    }
}

fn controls_name(controls: Controls) -> &'static str {
    match controls {
        Controls::Start => "start",
        Controls::Running => "running",
    }
}

#[derive(Default)]
struct Shared {
    frame: Option<Vec<u8>>,
    annotated: Option<Vec<u8>>,
    status: StatusSnapshot,
}

/// State shared between the session view and the HTTP handlers.
#[derive(Default)]
pub struct PreviewState {
    shared: Mutex<Shared>,
}

impl PreviewState {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_status(&self, message: &str, level: StatusLevel) {
        let mut shared = self.lock();
        shared.status.message = message.to_string();
        shared.status.level = level.to_string();
    }

    pub fn set_controls(&self, controls: Controls) {
        self.lock().status.controls = controls_name(controls);
    }

    pub fn set_measurement(&self, measurement: Option<&CachedMeasurement>) {
        self.lock().status.measurement = measurement.map(MeasurementSnapshot::from);
    }

    /// Detaching drops the last frame. Attaching a new stream also drops the
    /// previous session's annotated image.
    pub fn set_attached(&self, attached: bool) {
        let mut shared = self.lock();
        shared.status.attached = attached;
        if attached {
            shared.annotated = None;
        } else {
            shared.frame = None;
        }
    }

    pub fn set_frame(&self, jpeg: &[u8]) {
        let mut shared = self.lock();
        if shared.status.attached {
            shared.frame = Some(jpeg.to_vec());
        }
    }

    pub fn frame(&self) -> Option<Vec<u8>> {
        self.lock().frame.clone()
    }

    pub fn set_annotated(&self, image: &[u8]) {
        self.lock().annotated = Some(image.to_vec());
    }

    pub fn annotated(&self) -> Option<Vec<u8>> {
        self.lock().annotated.clone()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.lock().status.clone()
    }
}

/// Handle for the preview server thread.
pub struct PreviewServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PreviewServer {
    /// Signal the server to stop and block until the thread exits.
    pub fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/frame.jpg", web::get().to(frame_handler))
        .route("/annotated", web::get().to(annotated_handler))
        .route("/status", web::get().to(status_handler));
}

/// Spawn the preview server thread and return a handle that can stop it.
pub fn spawn_preview_server(addr: SocketAddr, state: Arc<PreviewState>) -> Result<PreviewServer> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let data = web::Data::from(state);
    let handle = spawn_thread("preview-server", move || {
        if let Err(err) = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(routes))
                .workers(1)
                .bind(addr)?
                .run();
            info!("preview available at http://{addr}/frame.jpg");

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        }) {
            error!("preview server error: {err}");
        }
    })
    .context("failed to spawn preview server thread")?;
    Ok(PreviewServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

async fn frame_handler(state: web::Data<PreviewState>) -> HttpResponse {
    match state.frame() {
        Some(jpeg) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .append_header(("Cache-Control", "no-cache"))
            .body(jpeg),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Latest backend visualization; kept after the camera stops.
async fn annotated_handler(state: web::Data<PreviewState>) -> HttpResponse {
    match state.annotated() {
        Some(image) => HttpResponse::Ok()
            .content_type(image_content_type(&image))
            .append_header(("Cache-Control", "no-cache"))
            .body(image),
        None => HttpResponse::NoContent().finish(),
    }
}

fn image_content_type(image: &[u8]) -> &'static str {
    if image.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else {
        "image/jpeg"
    }
}

async fn status_handler(state: web::Data<PreviewState>) -> HttpResponse {
    HttpResponse::Ok().json(state.status())
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test};
    use serde_json::Value;

    use super::*;

    fn app_state() -> Arc<PreviewState> {
        Arc::new(PreviewState::default())
    }

    #[actix_web::test]
    async fn frame_is_served_only_while_attached() {
        let state = app_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(state.clone()))
                .configure(routes),
        )
        .await;

        state.set_frame(&[0xFF, 0xD8]);
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/frame.jpg").to_request())
                .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        state.set_attached(true);
        state.set_frame(&[0xFF, 0xD8, 0xFF]);
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/frame.jpg").to_request())
                .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert_eq!(&body[..], &[0xFF, 0xD8, 0xFF]);

        state.set_attached(false);
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/frame.jpg").to_request())
                .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[actix_web::test]
    async fn annotated_image_outlives_the_stream() {
        let state = app_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(state.clone()))
                .configure(routes),
        )
        .await;

        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/annotated").to_request())
                .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        state.set_attached(true);
        state.set_annotated(&[0x89, b'P', b'N', b'G', 1]);
        state.set_attached(false);
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/annotated").to_request())
                .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "image/png"
        );
        let body = test::read_body(resp).await;
        assert_eq!(&body[..], &[0x89, b'P', b'N', b'G', 1]);

        state.set_attached(true);
        assert!(state.annotated().is_none());
    }

    #[actix_web::test]
    async fn status_reports_message_controls_and_measurement() {
        let state = app_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(state.clone()))
                .configure(routes),
        )
        .await;

        state.set_controls(Controls::Running);
        state.set_status("Camera active.", StatusLevel::Success);
        state.set_measurement(Some(&CachedMeasurement {
            measurement: Measurement::Distance {
                distance: 3.0,
                area: 12.5,
            },
            confidence: Some(0.9),
            method: None,
            captured_at: Utc::now(),
        }));

        let body: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/status").to_request(),
        )
        .await;
        assert_eq!(body["message"], "Camera active.");
        assert_eq!(body["level"], StatusLevel::Success.to_string());
        assert_eq!(body["controls"], "running");
        assert_eq!(body["measurement"]["kind"], "distance");
        assert_eq!(body["measurement"]["distance"], 3.0);
        assert!(body["measurement"].get("base").is_none());
    }
}
