//! Measurement session controller.
//!
//! Owns the camera stream, the capture surface and the measurement cache for
//! one user-facing measurement workflow:
//!
//! ```text
//! Idle --start--> Acquiring --metadata--> Active --stop / auto-stop--> Stopping --> Idle
//!                     |                     |
//!                     +--error/timeout--> Idle   (tick every `tick_interval`)
//! ```
//!
//! All mutable state lives behind one mutex that is never held across an
//! await. Every session gets a fresh generation number; ticks and replies
//! tagged with an older generation are dropped, which is how a reply landing
//! after `stop` is kept from touching the cache or the view.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use chrono::Utc;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{Instrument, debug, info, info_span, warn};
use video_ingest::{CameraDevice, CameraStream, Frame, FrameFormat, StreamMetadata};

use crate::{
    client::DetectionBackend,
    config::SessionConfig,
    encoding::{decode_image, encode_jpeg, to_data_url},
    error::{SessionError, TransportError},
    marker::MarkerSide,
    protocol::{CachedMeasurement, DetectionReply, DetectionRequest},
    view::{Controls, SessionView, StatusLevel},
};

const MSG_STARTING: &str = "Starting camera...";
const MSG_ACTIVE: &str = "Camera active. Measuring in real time...";
const MSG_CAPTURING: &str = "Capturing image and detecting markers...";
const MSG_CAPTURE_FAILED: &str = "Error capturing the camera frame.";
const MSG_STOPPED: &str = "Camera stopped.";
const MSG_COMPLETED: &str = "Measurement complete. Camera closed automatically.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Acquiring,
    Active,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::Acquiring => "acquiring",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickSource {
    Periodic,
    Manual,
}

/// Non-error results of a tick.
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// The backend found the markers; the cache now holds this value.
    Measured(CachedMeasurement),
    /// A submission for this session was still outstanding.
    Skipped,
    /// The session stopped before the tick could run or its reply arrived.
    Discarded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StopReason {
    Requested,
    Completed,
}

struct Core<S> {
    state: SessionState,
    generation: u64,
    /// Stream opened by a start that is still waiting for metadata.
    pending: Option<S>,
    camera: Option<S>,
    surface: Option<Frame>,
    cache: Option<CachedMeasurement>,
    in_flight: Option<u64>,
    succeeded: bool,
    ticker: Option<JoinHandle<()>>,
    auto_stop: Option<JoinHandle<()>>,
}

struct Inner<C: CameraDevice> {
    device: C,
    backend: Arc<dyn DetectionBackend>,
    view: Arc<dyn SessionView>,
    marker: Arc<MarkerSide>,
    config: SessionConfig,
    core: Mutex<Core<C::Stream>>,
    state_tx: watch::Sender<SessionState>,
}

/// Handle to a measurement session. Dropping it stops any running session.
pub struct SessionController<C: CameraDevice> {
    inner: Arc<Inner<C>>,
}

impl<C: CameraDevice> SessionController<C> {
    pub fn new(
        device: C,
        backend: Arc<dyn DetectionBackend>,
        view: Arc<dyn SessionView>,
        config: SessionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let marker = Arc::new(MarkerSide::new(config.marker_side_cm));
        Self {
            inner: Arc::new(Inner {
                device,
                backend,
                view,
                marker,
                config,
                core: Mutex::new(Core {
                    state: SessionState::Idle,
                    generation: 0,
                    pending: None,
                    camera: None,
                    surface: None,
                    cache: None,
                    in_flight: None,
                    succeeded: false,
                    ticker: None,
                    auto_stop: None,
                }),
                state_tx,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Marker side input read by every tick.
    pub fn marker(&self) -> Arc<MarkerSide> {
        self.inner.marker.clone()
    }

    pub fn cached_measurement(&self) -> Option<CachedMeasurement> {
        self.inner.lock().cache.clone()
    }

    /// Dimensions of the capture surface while a stream is live.
    pub fn surface_size(&self) -> Option<(u32, u32)> {
        self.inner
            .lock()
            .surface
            .as_ref()
            .map(|surface| (surface.width, surface.height))
    }

    /// Acquire the camera and begin periodic measurement.
    ///
    /// Resolves once the stream is live or acquisition has failed. Failures
    /// are reported to the view and leave the controller idle.
    pub async fn start(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        let generation = {
            let mut core = inner.lock();
            if core.state != SessionState::Idle {
                return Err(SessionError::AlreadyActive);
            }
            core.generation += 1;
            core.cache = None;
            core.succeeded = false;
            core.in_flight = None;
            inner.set_state(&mut core, SessionState::Acquiring);
            core.generation
        };

        let span = info_span!("measurement.session", generation);
        async move {
            inner.view.report(MSG_STARTING, StatusLevel::Info);
            if let Err(err) = inner.open_pending(generation) {
                return Err(inner.abort_acquisition(generation, err));
            }
            let metadata = match inner.wait_for_metadata(generation).await {
                Ok(metadata) => metadata,
                Err(err) => return Err(inner.abort_acquisition(generation, err)),
            };
            inner.activate(generation, metadata)
        }
        .instrument(span)
        .await
    }

    /// Perform one capture-and-detect cycle right now, outside the schedule.
    pub async fn capture_now(&self) -> Result<TickOutcome, SessionError> {
        let generation = {
            let core = self.inner.lock();
            (core.state == SessionState::Active && core.camera.is_some()).then_some(core.generation)
        };
        let Some(generation) = generation else {
            let err = SessionError::NotActive;
            self.inner.view.report(&err.user_message(), StatusLevel::Error);
            return Err(err);
        };
        self.inner.view.report(MSG_CAPTURING, StatusLevel::Info);
        self.inner.run_tick(generation, TickSource::Manual).await
    }

    /// Stop the session and release the camera. Calling it while idle does nothing.
    pub fn stop(&self) {
        self.inner.stop(None, StopReason::Requested);
    }
}

impl<C: CameraDevice> Drop for SessionController<C> {
    fn drop(&mut self) {
        self.inner.stop(None, StopReason::Requested);
    }
}

impl<C: CameraDevice> Inner<C> {
    fn lock(&self) -> MutexGuard<'_, Core<C::Stream>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, core: &mut Core<C::Stream>, state: SessionState) {
        debug!("session {} -> {}", core.state, state);
        core.state = state;
        self.state_tx.send_replace(state);
    }

    /// Open the device while holding the lock, so a concurrent `stop` either
    /// runs before the open or finds the stream parked in `pending`.
    fn open_pending(&self, generation: u64) -> Result<(), SessionError> {
        let mut core = self.lock();
        if core.generation != generation || core.state != SessionState::Acquiring {
            return Err(SessionError::Cancelled);
        }
        core.pending = Some(self.device.open(&self.config.request)?);
        Ok(())
    }

    async fn wait_for_metadata(&self, generation: u64) -> Result<StreamMetadata, SessionError> {
        let timeout = self.config.metadata_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut core = self.lock();
                if core.generation != generation {
                    return Err(SessionError::Cancelled);
                }
                let Some(stream) = core.pending.as_mut() else {
                    return Err(SessionError::Cancelled);
                };
                if let Some(metadata) = stream.metadata()? {
                    return Ok(metadata);
                }
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Timeout(timeout));
            }
            time::sleep(self.config.metadata_poll).await;
        }
    }

    /// Release a stream that never became active and put the controller back
    /// to idle, unless a stop already did.
    fn abort_acquisition(&self, generation: u64, err: SessionError) -> SessionError {
        let current = {
            let mut core = self.lock();
            let current = core.generation == generation && core.state == SessionState::Acquiring;
            if current {
                if let Some(mut stream) = core.pending.take() {
                    release_stream(&mut stream);
                }
                self.set_state(&mut core, SessionState::Idle);
            }
            current
        };
        if current {
            warn!("camera acquisition failed: {err}");
            metrics::counter!("measurement_sessions_total", "result" => "failed").increment(1);
            self.view.controls(Controls::Start);
            self.view.report(&err.user_message(), StatusLevel::Error);
            err
        } else {
            SessionError::Cancelled
        }
    }

    fn activate(
        self: &Arc<Self>,
        generation: u64,
        metadata: StreamMetadata,
    ) -> Result<(), SessionError> {
        {
            let mut core = self.lock();
            if core.generation != generation || core.state != SessionState::Acquiring {
                return Err(SessionError::Cancelled);
            }
            let Some(stream) = core.pending.take() else {
                return Err(SessionError::Cancelled);
            };
            core.surface = Some(Frame::blank(
                metadata.width,
                metadata.height,
                FrameFormat::Rgb8,
            ));
            core.camera = Some(stream);
            core.ticker = Some(spawn_ticker(
                Arc::downgrade(self),
                generation,
                self.config.tick_interval,
            ));
            self.set_state(&mut core, SessionState::Active);
        }
        info!(
            "camera active at {}x{}, ticking every {}ms",
            metadata.width,
            metadata.height,
            self.config.tick_interval.as_millis()
        );
        metrics::counter!("measurement_sessions_total", "result" => "started").increment(1);
        self.view.preview_attached(true);
        self.view.controls(Controls::Running);
        self.view.report(MSG_ACTIVE, StatusLevel::Success);
        Ok(())
    }

    async fn run_tick(
        self: &Arc<Self>,
        generation: u64,
        source: TickSource,
    ) -> Result<TickOutcome, SessionError> {
        let span = info_span!("measurement.tick", generation, source = ?source);
        let result = self.tick(generation).instrument(span).await;
        let label = match &result {
            Ok(TickOutcome::Measured(_)) => "measured",
            Ok(TickOutcome::Skipped) => "skipped",
            Ok(TickOutcome::Discarded) => "discarded",
            Err(SessionError::Detection(_)) => "rejected",
            Err(SessionError::Transport(_)) => "transport_error",
            Err(_) => "capture_error",
        };
        metrics::counter!("measurement_ticks_total", "outcome" => label).increment(1);
        result
    }

    async fn tick(self: &Arc<Self>, generation: u64) -> Result<TickOutcome, SessionError> {
        let side_length_m = self.marker.meters();

        let jpeg = {
            let mut core = self.lock();
            if core.generation != generation || core.state != SessionState::Active {
                return Ok(TickOutcome::Discarded);
            }
            if core.in_flight == Some(generation) {
                debug!("previous submission still outstanding; skipping tick");
                return Ok(TickOutcome::Skipped);
            }
            let Core {
                camera, surface, ..
            } = &mut *core;
            let (Some(camera), Some(surface)) = (camera.as_mut(), surface.as_mut()) else {
                return Ok(TickOutcome::Discarded);
            };
            let encoded = camera
                .grab(surface)
                .map_err(SessionError::from)
                .and_then(|()| {
                    encode_jpeg(surface, self.config.jpeg_quality).map_err(SessionError::from)
                });
            match encoded {
                Ok(jpeg) => {
                    core.in_flight = Some(generation);
                    jpeg
                }
                Err(err) => {
                    drop(core);
                    warn!("frame capture failed: {err}");
                    self.view.report(MSG_CAPTURE_FAILED, StatusLevel::Error);
                    return Err(err);
                }
            }
        };

        self.view.preview_frame(&jpeg);
        let request = DetectionRequest {
            image: to_data_url(&jpeg),
            side_length_m,
            want_visualization: self.config.want_visualization,
        };
        debug!(
            "submitting {} byte frame, marker side {side_length_m} m",
            jpeg.len()
        );
        let result = self.backend.detect(request).await;

        let reply = {
            let mut core = self.lock();
            if core.in_flight == Some(generation) {
                core.in_flight = None;
            }
            if core.generation != generation || core.state != SessionState::Active {
                debug!("session ended while detection was in flight; dropping reply");
                return Ok(TickOutcome::Discarded);
            }
            match result {
                Ok(DetectionReply::Detected {
                    measurement,
                    extras,
                }) => {
                    let cached = CachedMeasurement {
                        measurement,
                        confidence: extras.confidence,
                        method: extras.method,
                        captured_at: Utc::now(),
                    };
                    core.cache = Some(cached.clone());
                    if !core.succeeded {
                        core.succeeded = true;
                        core.auto_stop = Some(self.spawn_auto_stop(generation));
                    }
                    Reply::Accepted(cached, extras.visualization)
                }
                Ok(DetectionReply::Rejected(message)) => Reply::Rejected(message),
                Err(err) => Reply::Failed(err),
            }
        };

        match reply {
            Reply::Accepted(cached, visualization) => {
                info!("measured {}", cached.measurement);
                self.view.measurement(Some(&cached));
                if let Some(visualization) = visualization {
                    match decode_image(&visualization) {
                        Ok(image) => self.view.annotated_frame(&image),
                        Err(err) => warn!("backend visualization is not valid base64: {err}"),
                    }
                }
                self.view
                    .report(&cached.measurement.to_string(), StatusLevel::Success);
                Ok(TickOutcome::Measured(cached))
            }
            Reply::Rejected(message) => {
                debug!("backend rejected frame: {message}");
                self.view.measurement(None);
                self.view.report(&message, StatusLevel::Error);
                Err(SessionError::Detection(message))
            }
            Reply::Failed(err) => {
                warn!("detection request failed: {err}");
                let err = SessionError::Transport(err);
                self.view.report(&err.user_message(), StatusLevel::Error);
                Err(err)
            }
        }
    }

    fn spawn_auto_stop(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let inner = Arc::downgrade(self);
        let delay = self.config.auto_stop_delay;
        tokio::spawn(async move {
            time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                inner.stop(Some(generation), StopReason::Completed);
            }
        })
    }

    /// Tear the session down. With `only` set, a session that has since been
    /// replaced is left alone.
    fn stop(&self, only: Option<u64>, reason: StopReason) {
        {
            let mut core = self.lock();
            if core.state == SessionState::Idle {
                return;
            }
            if only.is_some_and(|generation| generation != core.generation) {
                return;
            }
            self.set_state(&mut core, SessionState::Stopping);
            // Invalidate in-flight ticks before the camera goes away.
            core.generation += 1;
            if let Some(ticker) = core.ticker.take() {
                ticker.abort();
            }
            if let Some(auto_stop) = core.auto_stop.take() {
                auto_stop.abort();
            }
            core.in_flight = None;
            if let Some(mut pending) = core.pending.take() {
                release_stream(&mut pending);
            }
            if let Some(mut camera) = core.camera.take() {
                release_stream(&mut camera);
            }
            core.surface = None;
            self.set_state(&mut core, SessionState::Idle);
        }

        info!("camera session stopped ({reason:?})");
        metrics::counter!("measurement_sessions_total", "result" => "stopped").increment(1);
        self.view.preview_attached(false);
        self.view.controls(Controls::Start);
        self.view.report(MSG_STOPPED, StatusLevel::Info);
        if reason == StopReason::Completed {
            self.view.report(MSG_COMPLETED, StatusLevel::Success);
        }
    }
}

enum Reply {
    Accepted(CachedMeasurement, Option<String>),
    Rejected(String),
    Failed(TransportError),
}

fn spawn_ticker<C: CameraDevice>(
    inner: Weak<Inner<C>>,
    generation: u64,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            // Ticks run detached so a slow backend never delays the schedule;
            // the in-flight guard turns overlapping ones into skips.
            tokio::spawn(async move {
                let _ = inner.run_tick(generation, TickSource::Periodic).await;
            });
        }
    })
}

/// Stop every track, continuing past tracks that fail to stop.
fn release_stream<S: CameraStream>(stream: &mut S) {
    for index in 0..stream.track_count() {
        if let Err(err) = stream.stop_track(index) {
            warn!("failed to stop camera track {index}: {err}");
        }
    }
}
