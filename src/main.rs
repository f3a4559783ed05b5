use hax_bridge::bridge::{Bridge, TracingPublisher};
use hax_bridge::config::BridgeConfig;
use hax_bridge::server::{create_metrics, shutdown_channel, wait_for_signal};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BridgeConfig::from_env()?;
    config.logging.init();

    info!(
        addr = %config.listen_addr,
        decode_failure = ?config.ingestion.decode_failure,
        entrypoint_policy = ?config.worker.entrypoint_policy,
        failure_policy = ?config.worker.failure_policy,
        "Starting hax bridge"
    );

    let metrics = create_metrics()?;

    // Stop the bridge on SIGTERM/SIGINT
    let (shutdown_controller, shutdown_signal) = shutdown_channel();
    let signal_task = tokio::spawn(async move {
        let signal = wait_for_signal().await;
        info!(signal = signal, "Initiating graceful shutdown");
        shutdown_controller.shutdown();
    });

    // No aggregator is attached to the standalone binary; statuses are logged
    let bridge = Bridge::start(
        Arc::new(TracingPublisher),
        config.worker,
        config.ingestion,
        metrics,
    );

    let result = bridge.run(config.listen_addr, shutdown_signal).await;
    signal_task.abort();

    match result {
        Ok(report) => {
            info!(
                worker_exit = %report.worker_exit,
                sentinel_sent = report.sentinel_sent,
                "hax bridge shut down gracefully"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "hax bridge stopped with an error");
            Err(e.into())
        }
    }
}
