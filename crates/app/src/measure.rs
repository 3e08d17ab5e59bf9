//! `luminaria measure`: run a camera session from the terminal.

use std::{future::Future, sync::Arc};

use anyhow::{Context as _, Result};
use measurement::{DetectionBackend, SessionConfig, SessionController, SessionState};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
};
use tracing::{debug, info, warn};
#[cfg(feature = "opencv")]
use video_ingest::OpenCvCamera;
use video_ingest::{CameraDevice, CameraSource, StillImageCamera};

use crate::{
    auth::OperatorRegistry,
    calculator::{Calculator, InputMode},
    cli::{Context, MeasureArgs, present_layout},
    preview::{PreviewState, spawn_preview_server},
    terminal::{COMMAND_HELP, Command, TerminalView},
};

pub async fn run(args: MeasureArgs, ctx: &Context) -> Result<()> {
    let config = SessionConfig::try_from(args.session.clone())?;
    let calculator = ctx.calculator(args.operator.as_deref(), InputMode::Camera)?;
    match CameraSource::from_uri(&args.camera) {
        CameraSource::Still(path) => {
            drive(StillImageCamera::new(path), config, args, calculator, ctx).await
        }
        #[cfg(feature = "opencv")]
        CameraSource::Device(uri) => {
            drive(OpenCvCamera::new(uri), config, args, calculator, ctx).await
        }
        #[cfg(not(feature = "opencv"))]
        CameraSource::Device(uri) => anyhow::bail!(
            "camera {uri:?} needs a build with the `opencv` feature; use still:<path> to measure an image file"
        ),
    }
}

#[derive(Debug, PartialEq)]
enum Exit {
    Idle,
    Quit,
    Interrupted,
}

async fn drive<C: CameraDevice>(
    camera: C,
    config: SessionConfig,
    args: MeasureArgs,
    mut calculator: Calculator<OperatorRegistry>,
    ctx: &Context,
) -> Result<()> {
    let preview = Arc::new(PreviewState::default());
    let server = args
        .preview
        .map(|addr| spawn_preview_server(addr, preview.clone()))
        .transpose()?;

    let backend: Arc<dyn DetectionBackend> = Arc::new(ctx.backend.clone());
    let view = Arc::new(TerminalView::new(preview));
    let controller = SessionController::new(camera, backend, view, config);
    if args.layout && !calculator.gate().is_authenticated() {
        warn!("--layout without --operator: the calculator will refuse to run");
    }

    let started = controller.start().await;
    let exit = match started {
        Ok(()) => interact(&controller, &mut calculator).await,
        Err(err) => {
            if let Some(server) = server {
                server.stop();
            }
            return Err(err).context("camera session did not start");
        }
    };
    controller.stop();
    debug!("measurement loop ended");

    let cached = controller.cached_measurement();
    match &cached {
        Some(cached) => println!("Last measurement: {}", cached.measurement),
        None => println!("No measurement was taken."),
    }

    let result = if args.layout && !matches!(exit, Exit::Interrupted) {
        match calculator
            .calculate(&ctx.backend, cached.as_ref(), args.manual.input())
            .await
        {
            Ok(report) => present_layout(&ctx.backend, &report, args.download.as_deref()).await,
            Err(err) => Err(err.into()),
        }
    } else {
        Ok(())
    };

    calculator.gate_mut().logout();
    if let Some(server) = server {
        server.stop();
    }
    result
}

/// Read commands until the session goes idle, the user quits or Ctrl-C.
async fn interact<C: CameraDevice>(
    controller: &SessionController<C>,
    calculator: &mut Calculator<OperatorRegistry>,
) -> Exit {
    let mut state = controller.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            () = async { drop(state.wait_for(|s| *s == SessionState::Idle).await) } => {
                return Exit::Idle;
            }
            _ = ctrl_c() => {
                info!("interrupted; stopping camera");
                controller.stop();
                return Exit::Interrupted;
            }
            line = lines.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        debug!("stdin closed; measuring until the session ends");
                        stdin_open = false;
                        continue;
                    }
                    Err(err) => {
                        warn!("failed to read stdin: {err}");
                        stdin_open = false;
                        continue;
                    }
                };
                match Command::parse(&line) {
                    Command::Capture => {
                        let capture = controller.capture_now();
                        match until_interrupted(capture, &mut state, ctrl_c()).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(err)) => debug!("manual capture: {err}"),
                            Err(Exit::Interrupted) => {
                                info!("interrupted; stopping camera");
                                controller.stop();
                                return Exit::Interrupted;
                            }
                            Err(exit) => return exit,
                        }
                    }
                    Command::Stop => controller.stop(),
                    Command::Quit => {
                        controller.stop();
                        return Exit::Quit;
                    }
                    Command::Marker(cm) => {
                        let marker = controller.marker();
                        marker.set_centimeters(cm);
                        println!("Marker side set to {} cm", marker.centimeters());
                    }
                    Command::Manual => {
                        if calculator.set_mode(InputMode::Manual, controller) {
                            println!("Switched to manual input; camera stopped.");
                        }
                    }
                    Command::Empty => {}
                    Command::Unknown(text) => println!("unknown command {text:?}; {COMMAND_HELP}"),
                }
            }
        }
    }
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
}

/// Run `work` to completion unless the session goes idle or `interrupt`
/// fires first.
async fn until_interrupted<F: Future>(
    work: F,
    state: &mut watch::Receiver<SessionState>,
    interrupt: impl Future<Output = ()>,
) -> Result<F::Output, Exit> {
    tokio::select! {
        output = work => Ok(output),
        idle = state.wait_for(|s| *s == SessionState::Idle) => {
            drop(idle);
            Err(Exit::Idle)
        }
        () = interrupt => Err(Exit::Interrupted),
    }
}

#[cfg(test)]
mod tests {
    use std::future;

    use super::*;

    #[tokio::test]
    async fn interrupt_preempts_a_pending_capture() {
        let (_tx, mut state) = watch::channel(SessionState::Active);
        let outcome = until_interrupted(future::pending::<()>(), &mut state, async {}).await;
        assert_eq!(outcome, Err(Exit::Interrupted));
    }

    #[tokio::test]
    async fn session_ending_preempts_a_pending_capture() {
        let (tx, mut state) = watch::channel(SessionState::Active);
        let work = future::pending::<()>();
        let stop = async {
            tx.send_replace(SessionState::Idle);
            future::pending::<()>().await
        };
        let outcome = tokio::select! {
            outcome = until_interrupted(work, &mut state, future::pending()) => outcome,
            () = stop => unreachable!(),
        };
        assert_eq!(outcome, Err(Exit::Idle));
    }

    #[tokio::test]
    async fn finished_capture_returns_its_output() {
        let (_tx, mut state) = watch::channel(SessionState::Active);
        let outcome = until_interrupted(async { 7 }, &mut state, future::pending()).await;
        assert_eq!(outcome, Ok(7));
    }
}
