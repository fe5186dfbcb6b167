mod config;
mod logging;
mod pipeline;

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use collector_client::BlockingServiceClient;
use live_metrics::LiveMetricsModule;
use quota::SystemClock;

use crate::config::Cli;
use crate::config::Commands;
use crate::config::RunArgs;
use crate::config::Settings;
use crate::pipeline::JsonLinesForwarder;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_args) => run(run_args),
    }
}

fn run(run_args: RunArgs) -> Result<()> {
    let _guard = logging::init(run_args.log_file.as_deref())?;

    tracing::info!("Starting live metrics agent {}", env!("CARGO_PKG_VERSION"));

    let settings = match &run_args.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let client = BlockingServiceClient::new(run_args.client_config(&settings)?)
        .map_err(|e| anyhow::anyhow!("Failed to create collector client: {e:?}"))?;
    let module = LiveMetricsModule::new(
        run_args.module_config(&settings),
        Arc::new(client),
        Arc::new(SystemClock),
    );
    let processor = module
        .register_processor(Arc::new(JsonLinesForwarder::new(std::io::stdout())))
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    module.start().map_err(|e| anyhow::anyhow!("{e:?}"))?;

    let stats = match run_args.input_path() {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("open telemetry input {}", path.display()))?;
            pipeline::feed(BufReader::new(file), processor.as_ref())?
        }
        None => pipeline::feed(std::io::stdin().lock(), processor.as_ref())?,
    };
    tracing::info!(
        processed = stats.processed,
        skipped = stats.skipped,
        linger_secs = run_args.linger_secs,
        "Telemetry input finished"
    );

    std::thread::sleep(Duration::from_secs(run_args.linger_secs));
    module.shutdown();

    Ok(())
}
