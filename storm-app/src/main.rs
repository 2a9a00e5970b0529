mod pipeline;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use pipeline::{Pipeline, Stage, SymbolRun};
use std::{future::Future, path::PathBuf, sync::Arc, time::Instant};
use storm_config::ConfigManager;
use storm_core::{RunStatus, SymbolStatus};
use tokio::{signal, sync::Semaphore};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Offline basis-storm alert backtester", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Restrict the batch to these symbols
    #[arg(long = "symbol", global = true)]
    symbols: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Walk-forward score every symbol and write alerts
    Backtest,
    /// Label written alerts and compute metrics
    Evaluate,
    /// Backtest, label and compute metrics in one pass
    Run,
}

impl From<Command> for Stage {
    fn from(command: Command) -> Self {
        match command {
            Command::Backtest => Stage::Backtest,
            Command::Evaluate => Stage::Evaluate,
            Command::Run => Stage::Run,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.debug, args.json_logs);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(args));

    // Symbols abandoned on Ctrl-C may still be running on the blocking pool.
    runtime.shutdown_background();
    result
}

async fn run(args: Args) -> Result<()> {
    info!("Starting Basis Storm monitor");

    let manager = ConfigManager::from_file(&args.config)?;
    manager.validate()?;
    let config = manager.into_config();

    let symbols = if args.symbols.is_empty() {
        config.universe.resolve()
    } else {
        args.symbols.clone()
    };
    let stage = Stage::from(args.command);
    let max_parallel = config.runtime.max_parallel;

    info!(
        "Running {:?} for {} symbols, {} at a time",
        stage,
        symbols.len(),
        max_parallel
    );

    let started = Instant::now();
    let pipeline = Arc::new(Pipeline::new(config));
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            futures::future::pending::<()>().await;
        }
    };

    let runs = match run_batch(pipeline.clone(), symbols, stage, max_parallel, interrupt).await {
        Some(runs) => runs,
        None => bail!("Batch interrupted"),
    };

    if stage.labels() {
        let path = pipeline.write_metrics(&runs)?;
        info!("Metrics written to {}", path.display());
    }

    let failed = summarize(&runs);
    info!("Finished in {:.1}s", started.elapsed().as_secs_f64());

    if failed > 0 {
        bail!("{} symbols failed", failed);
    }
    Ok(())
}

fn init_logging(debug: bool, json: bool) {
    let env_filter = if debug { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

/// Runs every symbol on the blocking pool, at most `max_parallel` at once.
/// Returns `None` when `interrupt` resolves first. Symbols not yet started
/// are aborted; symbols already running are abandoned, not stopped.
async fn run_batch(
    pipeline: Arc<Pipeline>,
    symbols: Vec<String>,
    stage: Stage,
    max_parallel: usize,
    interrupt: impl Future<Output = ()>,
) -> Option<Vec<SymbolRun>> {
    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));

    let handles: Vec<_> = symbols
        .iter()
        .cloned()
        .map(|symbol| {
            let pipeline = pipeline.clone();
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return SymbolRun::failed(SymbolStatus::error(&symbol, e.to_string())),
                };

                let task_symbol = symbol.clone();
                match tokio::task::spawn_blocking(move || pipeline.run_symbol(&task_symbol, stage)).await {
                    Ok(run) => run,
                    Err(e) => {
                        error!("{}: task failed: {}", symbol, e);
                        SymbolRun::failed(SymbolStatus::error(&symbol, format!("task failed: {}", e)))
                    }
                }
            })
        })
        .collect();

    let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

    tokio::select! {
        biased;

        _ = interrupt => {
            warn!("Received Ctrl+C, aborting pending symbols...");
            aborts.iter().for_each(|handle| handle.abort());
            warn!("Symbols already running are abandoned; their outputs may still be written");
            None
        }
        results = futures::future::join_all(handles) => {
            Some(
                results
                    .into_iter()
                    .zip(&symbols)
                    .map(|(result, symbol)| {
                        result.unwrap_or_else(|e| {
                            SymbolRun::failed(SymbolStatus::error(symbol, e.to_string()))
                        })
                    })
                    .collect(),
            )
        }
    }
}

/// Logs one line per symbol plus the status totals; returns the error count.
fn summarize(runs: &[SymbolRun]) -> usize {
    let count = |status: RunStatus| runs.iter().filter(|r| r.status.status == status).count();

    for run in runs {
        let status = &run.status;
        match status.status {
            RunStatus::Ok => info!("{}: ok ({})", status.symbol, status.message),
            RunStatus::NoData => warn!("{}: no data ({})", status.symbol, status.message),
            RunStatus::Error => error!("{}: error ({})", status.symbol, status.message),
        }
    }

    let failed = count(RunStatus::Error);
    info!(
        "Summary: {} ok, {} no data, {} errors",
        count(RunStatus::Ok),
        count(RunStatus::NoData),
        failed
    );
    failed
}
