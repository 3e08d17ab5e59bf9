mod auth;
mod calculator;
mod cli;
mod measure;
mod preview;
mod telemetry;
mod terminal;

use anyhow::Context as _;
use clap::Parser;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli::Cli {
        backend,
        operators,
        telemetry: telemetry_args,
        command,
    } = cli::Cli::parse();
    let _telemetry_guard = telemetry::init_tracing(&telemetry_args);
    let metrics = telemetry::init_metrics_recorder()?;

    let ctx = cli::Context::new(&backend, operators)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let result = runtime.block_on(cli::dispatch(command, ctx));

    if telemetry_args.print_metrics {
        println!("{}", metrics.render());
    }
    result
}
