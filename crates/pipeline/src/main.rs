use anyhow::Context;
use common::TelemetryGuard;
use gateway::{AppState, display_channel, run_encoder, run_server};
use pipeline::service::build_filter;
use pipeline::{ControlListener, DeviceFactory, Orchestrator, PipelineConfig};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env();

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    // Batch exporters spawn onto the runtime, so the guard is built inside it.
    let _telemetry =
        runtime.block_on(async { TelemetryGuard::from_env("vinewatch", config.environment) })?;

    tracing::info!(
        environment = config.environment.as_str(),
        model = %config.inference.model_path,
        store = ?config.store.backend,
        threshold = config.confidence_threshold,
        excluded = %config.excluded_label,
        evidence_policy = ?config.evidence_policy,
        queue_policy = ?config.persist.full_policy,
        gateway = %config.gateway.addr,
        "vinewatch starting"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;
    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");

    let stores = store::open_store(&config.store).context("Failed to open remote store")?;
    let filter = build_filter(&config)?;

    let (display, frames) = display_channel();
    let (packets_tx, packets_rx) = watch::channel(None);
    runtime.spawn(run_encoder(frames, packets_tx, config.gateway.jpeg_quality));
    let server = runtime.spawn(run_server(
        config.gateway.clone(),
        AppState {
            packets: packets_rx,
        },
        wait_for_flag(Arc::clone(&shutdown)),
    ));

    let listener = ControlListener::new(stores.tree.clone());
    let factory = DeviceFactory::new(config.capture.clone(), config.inference.clone());
    let mut orchestrator = Orchestrator::new(config, stores, display, filter, Box::new(factory));

    let result = orchestrator.run(&shutdown, &listener);

    // Releases the last display sender so the encoder task ends.
    shutdown.store(true, Ordering::Release);
    drop(orchestrator);

    match runtime.block_on(server) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Display server failed"),
        Err(e) => tracing::error!(error = %e, "Display server task panicked"),
    }

    let summary = result.context("Orchestrator failed")?;
    if let Some(summary) = summary {
        tracing::info!(
            cycles = summary.cycles,
            skipped = summary.frames_skipped,
            "Last session summary"
        );
    }
    tracing::info!("vinewatch stopped");
    Ok(())
}

async fn wait_for_flag(flag: Arc<AtomicBool>) {
    while !flag.load(Ordering::Acquire) {
        tokio::time::sleep(SHUTDOWN_POLL).await;
    }
}
