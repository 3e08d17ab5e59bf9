use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use measurement::{DEFAULT_BACKEND_URL, HttpBackend, OptimizationProfile, SessionArgs};

use crate::{
    auth::{AuthGate, AuthOptions, EnrollOptions, FaceAuthenticator, OperatorRegistry},
    calculator::{self, Calculator, InputMode, ManualArgs},
    measure,
    telemetry::TelemetryArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "luminaria",
    version,
    about = "Measure a room with camera markers and compute its luminaire layout"
)]
pub struct Cli {
    /// Base URL of the measurement backend.
    #[arg(long, global = true, env = "LUMINARIA_BACKEND", default_value = DEFAULT_BACKEND_URL)]
    pub backend: String,
    /// JSON file holding enrolled operators.
    #[arg(
        long,
        global = true,
        env = "LUMINARIA_OPERATORS",
        default_value = "operators.json"
    )]
    pub operators: PathBuf,
    #[command(flatten)]
    pub telemetry: TelemetryArgs,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a live camera measurement session.
    Measure(MeasureArgs),
    /// Compute a layout from typed dimensions.
    Layout(LayoutArgs),
    /// Enroll an operator allowed to use the calculator.
    Enroll(EnrollArgs),
    /// Switch the backend detection profile.
    Profile {
        #[arg(value_enum)]
        profile: OptimizationProfile,
    },
}

#[derive(Args, Debug)]
pub struct MeasureArgs {
    /// Camera source: `still:<path>`, a device index or a capture URI.
    #[arg(long, default_value = "0")]
    pub camera: String,
    #[command(flatten)]
    pub session: SessionArgs,
    /// Serve `/frame.jpg`, `/annotated` and `/status` on this address.
    #[arg(long, value_name = "ADDR")]
    pub preview: Option<SocketAddr>,
    /// Compute the layout once the session ends.
    #[arg(long)]
    pub layout: bool,
    /// Enrolled operator name; required by `--layout`.
    #[arg(long)]
    pub operator: Option<String>,
    #[command(flatten)]
    pub manual: ManualArgs,
    /// Save the distribution image into this directory.
    #[arg(long, value_name = "DIR")]
    pub download: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct LayoutArgs {
    /// Enrolled operator name.
    #[arg(long)]
    pub operator: Option<String>,
    #[command(flatten)]
    pub manual: ManualArgs,
    /// Save the distribution image into this directory.
    #[arg(long, value_name = "DIR")]
    pub download: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct EnrollArgs {
    pub name: String,
    #[arg(long)]
    pub email: Option<String>,
}

pub struct Context {
    pub backend: HttpBackend,
    pub registry: OperatorRegistry,
}

impl Context {
    pub fn new(backend_url: &str, operators: PathBuf) -> Result<Self> {
        let backend = HttpBackend::new(backend_url)
            .with_context(|| format!("invalid backend url {backend_url}"))?;
        Ok(Self {
            backend,
            registry: OperatorRegistry::new(operators),
        })
    }

    /// Build a calculator, logging the operator in when one is named.
    pub fn calculator(
        &self,
        operator: Option<&str>,
        mode: InputMode,
    ) -> Result<Calculator<OperatorRegistry>> {
        let mut gate = AuthGate::new(self.registry.clone());
        if let Some(name) = operator {
            let user = gate
                .login(AuthOptions {
                    name: name.to_string(),
                })
                .map_err(|err| {
                    let message = err.user_message();
                    anyhow::Error::new(err).context(message)
                })?;
            println!("Authenticated as {}.", user.name);
        }
        Ok(Calculator::new(gate, mode))
    }
}

pub async fn dispatch(command: Command, ctx: Context) -> Result<()> {
    match command {
        Command::Measure(args) => measure::run(args, &ctx).await,
        Command::Layout(args) => layout(args, &ctx).await,
        Command::Enroll(args) => enroll(args, &ctx),
        Command::Profile { profile } => set_profile(profile, &ctx).await,
    }
}

async fn layout(args: LayoutArgs, ctx: &Context) -> Result<()> {
    let calculator = ctx.calculator(args.operator.as_deref(), InputMode::Manual)?;
    let report = calculator
        .calculate(&ctx.backend, None, args.manual.input())
        .await?;
    present_layout(&ctx.backend, &report, args.download.as_deref()).await
}

pub async fn present_layout(
    backend: &HttpBackend,
    report: &measurement::LayoutReport,
    download: Option<&std::path::Path>,
) -> Result<()> {
    println!("{}", calculator::render_report(report));
    if let Some(dir) = download {
        let path = calculator::download_image(backend, report, dir).await?;
        println!("Saved distribution image to {}", path.display());
    }
    Ok(())
}

fn enroll(args: EnrollArgs, ctx: &Context) -> Result<()> {
    let info = ctx
        .registry
        .enroll(EnrollOptions {
            name: args.name,
            email: args.email,
        })
        .map_err(|err| {
            let message = err.user_message();
            anyhow::Error::new(err).context(message)
        })?;
    println!(
        "Enrolled {} ({}). Log in with --operator \"{}\".",
        info.name, info.id, info.name
    );
    Ok(())
}

async fn set_profile(profile: OptimizationProfile, ctx: &Context) -> Result<()> {
    let ack = ctx
        .backend
        .set_profile(profile)
        .await
        .context("failed to change the detection profile")?;
    println!("{}", ack.message);
    if !ack.settings.is_null() {
        println!("{}", serde_json::to_string_pretty(&ack.settings)?);
    }
    Ok(())
}
