use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, error, info, warn};

use sleeplink_lib::config::{AppConfig, CONFIG_FILE_NAME};
use sleeplink_lib::core::bluetooth::{CommandSender, HealthCommand, LinkStatus};
use sleeplink_lib::core::events::{JsonLinesStore, PipelineEvent, spawn_store_consumer};
use sleeplink_lib::{logging, state::AppState};

/// Stream heart rate, steps and sleep metrics from a wrist-worn sensor
#[derive(Parser)]
#[command(name = "sleeplink")]
#[command(version)]
#[command(about = "Link a wrist-worn sensor and stream its telemetry", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Emit synthetic samples without connecting to a device
    #[arg(long)]
    simulate: bool,

    /// Device identifier reported by discovery
    #[arg(long, required_unless_present = "simulate")]
    device_id: Option<String>,

    /// Advertised device name
    #[arg(long, required_unless_present = "simulate")]
    device_name: Option<String>,

    /// Stop after this many samples (runs until Ctrl-C when omitted)
    #[arg(short = 'n', long)]
    samples: Option<usize>,

    /// Command sent right after monitoring starts
    #[arg(long)]
    request: Option<HealthCommand>,

    /// Append a sleep record per sample to this JSON-lines file
    #[arg(long)]
    store: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load_config(&cli.config).await?;
    let state = AppState::new(config).await?;
    let link = state.get_link_manager_arc();
    let mut events = link.dispatcher().subscribe();

    let store_task = match &cli.store {
        Some(path) => {
            let store = JsonLinesStore::open(path).await?;
            Some(spawn_store_consumer(link.dispatcher(), Arc::new(store)))
        }
        None => None,
    };
    debug!("Dispatching to {} event consumers", link.dispatcher().consumer_count());

    if cli.simulate {
        link.start_simulation().await?;
    } else {
        let (Some(id), Some(name)) = (cli.device_id.as_deref(), cli.device_name.as_deref()) else {
            bail!("--device-id and --device-name are required without --simulate");
        };
        let device = state.discovered_device(id, name)?;
        link.connect(&device)
            .await
            .with_context(|| format!("failed to connect to {}", name))?;
        link.start_monitoring().await?;
        if let Some(command) = cli.request {
            if let Err(e) = link.send_command(command).await {
                warn!("Failed to send {}: {}", command, e);
            }
        }
    }

    let mut received = 0usize;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(PipelineEvent::Sample(sample)) => {
                    received += 1;
                    info!(
                        "sample #{} [{:?}] hr={:?} steps={:?} sleep={:?}%/{:?}h score={:?}",
                        received,
                        sample.provenance(),
                        sample.heart_rate_bpm(),
                        sample.step_count(),
                        sample.sleep_quality_pct(),
                        sample.sleep_duration_hours(),
                        sample.quality_score(),
                    );
                    if cli.samples.is_some_and(|limit| received >= limit) {
                        break;
                    }
                }
                Some(PipelineEvent::LinkStatus(status)) => {
                    info!("link status: {:?}", status);
                    if status == LinkStatus::Disconnected && !cli.simulate {
                        warn!("Device link lost");
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    link.disconnect().await;
    // the store consumer drains what is queued once the dispatcher is gone
    drop(events);
    drop(link);
    drop(state);
    if let Some(task) = store_task {
        if let Err(e) = task.await {
            error!("Store consumer failed: {}", e);
        }
    }
    info!("Received {} samples", received);
    Ok(())
}
