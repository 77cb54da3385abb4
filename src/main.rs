use anyhow::{Context, Result};
use gemlink::sim::SimulatedDriverFactory;
use gemlink::{Config, DeviceCoordinator};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gemlink=info")),
        )
        .init();

    info!(
        "gemlink v{} ({} {}) starting",
        gemlink::VERSION,
        gemlink::build_info::GIT_HASH,
        gemlink::build_info::PROFILE
    );

    let config_path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            error!("Usage: gemlink <config.yaml>");
            std::process::exit(1);
        }
    };

    let config = Config::from_file(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;
    info!("Loaded {} device(s)", config.devices.len());

    let factory = Arc::new(SimulatedDriverFactory::new());
    let coordinator = Arc::new(
        DeviceCoordinator::from_config(&config, factory.clone())
            .await
            .context("registering devices")?,
    );

    let started = coordinator.start_all().await;
    for failure in started.results.iter().filter(|r| !r.success) {
        warn!(device = %failure.device_id, "Start failed: {}", failure.message);
    }
    info!("{} of {} devices started", started.succeeded, started.total);

    coordinator.start_health_monitor();

    let mut status_tick = tokio::time::interval(STATUS_INTERVAL);
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received shutdown signal");
                break;
            }
            _ = status_tick.tick() => {
                let report = serde_json::json!({
                    "summary": coordinator.summary(),
                    "devices": coordinator.all_status(),
                });
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{}", text),
                    Err(e) => warn!("Status serialization failed: {}", e),
                }
            }
        }
    }

    let stopped = coordinator.shutdown().await;
    factory.shutdown();
    info!(
        "Stopped {} of {} devices",
        stopped.succeeded, stopped.total
    );

    Ok(())
}
