//! streaming_controller - frame and capability API for registered devices
//!
//! This daemon:
//! 1. Opens the device directory
//! 2. Serves the stream API
//! 3. Captures frames on demand only (no continuous ingest)

use anyhow::{anyhow, Result};
use std::sync::{mpsc, Arc};

use streaming_controller::{
    api::{ApiConfig, ApiServer},
    ControllerConfig, DefaultCaptureBackend, FrameAcquirer, HttpOnboardingGateway,
    SqliteDeviceDirectory, StreamController,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ControllerConfig::load()?;
    let directory = Arc::new(SqliteDeviceDirectory::open(&config.db_path)?);
    let gateway = Arc::new(HttpOnboardingGateway::new(&config.onboarding));
    let backend = Arc::new(DefaultCaptureBackend::new(&config.capture));
    let acquirer = FrameAcquirer::new(backend, &config.capture);
    let controller = Arc::new(StreamController::new(&config, directory, gateway, acquirer));

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        capture_workers: config.capture.workers,
        onboarding_workers: config.onboarding.workers,
    };
    let api_handle = ApiServer::new(api_config, controller).spawn()?;
    log::info!("stream api listening on {}", api_handle.addr);
    log::info!(
        "streaming_controller running. devices from {}, onboarding at {}",
        config.db_path,
        config.onboarding.url
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("streaming_controller waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
