//! Lifecycle coordinator: owns the channel, the relay worker, and the ingestion server
//!
//! ```text
//! POST / ──► ingestion ──┐
//!                        ├──► channel ──► relay worker ──► aggregator / ha_link
//! ha_link ──► sender() ──┘
//! ```
//!
//! When ingestion stops, for whatever reason, the coordinator enqueues one
//! shutdown sentinel (unless the worker already stopped on its own) and
//! waits for the worker before returning.

use crate::bridge::collaborator::StatusPublisher;
use crate::bridge::message::{message_channel_with_metrics, MessageSender};
use crate::bridge::worker::{RelayError, RelayWorker, RelayWorkerConfig, WorkerExit, WorkerStatus};
use crate::server::ingestion::{serve_ingestion, IngestionConfig, IngestionState};
use crate::server::metrics::SharedMetrics;
use crate::server::shutdown::{shutdown_channel, ShutdownSignal};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to bind ingestion listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Ingestion server failed: {0}")]
    Server(#[source] std::io::Error),

    #[error("Relay worker failed: {0}")]
    Worker(#[from] RelayError),

    #[error("Relay worker task did not complete: {0}")]
    WorkerJoin(#[from] JoinError),
}

/// How a bridge run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeReport {
    pub worker_exit: WorkerExit,
    /// True only when the worker actually stopped on the coordinator's sentinel
    ///
    /// A sentinel enqueued just as the worker stopped on its own is left
    /// unconsumed and does not count.
    pub sentinel_sent: bool,
}

/// Sends the shutdown sentinel at most once, and on drop if nobody did
struct SentinelGuard {
    sender: Option<MessageSender>,
    worker_status: WorkerStatus,
}

impl SentinelGuard {
    /// Returns whether a sentinel was enqueued, not whether the worker will consume it
    fn fire(&mut self) -> bool {
        let Some(sender) = self.sender.take() else {
            return false;
        };

        if self.worker_status.is_stopped() {
            debug!("Relay worker already stopped, skipping shutdown message");
            return false;
        }

        match sender.send_shutdown() {
            Ok(()) => {
                debug!("Shutdown message enqueued");
                true
            }
            Err(_) => {
                // Worker stopped between the status check and the send
                debug!("Relay worker gone before shutdown message");
                false
            }
        }
    }
}

impl Drop for SentinelGuard {
    fn drop(&mut self) {
        self.fire();
    }
}

type WorkerHandle = JoinHandle<Result<WorkerExit, RelayError>>;

/// A running relay worker plus everything needed to serve ingestion into it
pub struct Bridge {
    sender: MessageSender,
    worker_status: WorkerStatus,
    worker: WorkerHandle,
    sentinel: SentinelGuard,
    ingestion: IngestionConfig,
    metrics: SharedMetrics,
}

impl Bridge {
    /// Create the channel and spawn the relay worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        publisher: Arc<dyn StatusPublisher>,
        worker_config: RelayWorkerConfig,
        ingestion: IngestionConfig,
        metrics: SharedMetrics,
    ) -> Self {
        let (sender, receiver) = message_channel_with_metrics(&metrics);
        let worker = RelayWorker::new(receiver, publisher, worker_config).with_metrics(metrics.clone());
        let worker_status = worker.status();
        let worker = tokio::spawn(worker.run());

        Self {
            sentinel: SentinelGuard {
                sender: Some(sender.clone()),
                worker_status: worker_status.clone(),
            },
            sender,
            worker_status,
            worker,
            ingestion,
            metrics,
        }
    }

    /// Producer handle for entrypoint requests and other in-process producers
    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    pub fn worker_status(&self) -> WorkerStatus {
        self.worker_status.clone()
    }

    /// Bind `addr` and serve until `shutdown` fires
    pub async fn run(
        self,
        addr: SocketAddr,
        shutdown: ShutdownSignal,
    ) -> Result<BridgeReport, BridgeError> {
        match TcpListener::bind(addr).await {
            Ok(listener) => self.serve(listener, shutdown).await,
            Err(source) => {
                error!(%addr, error = %source, "Failed to bind ingestion listener");
                let Bridge {
                    worker,
                    mut sentinel,
                    ..
                } = self;
                sentinel.fire();
                if let Err(e) = worker.await? {
                    warn!(error = %e, "Relay worker failed during aborted start");
                }
                Err(BridgeError::Bind { addr, source })
            }
        }
    }

    /// Serve ingestion on `listener` until `shutdown` fires or something fails
    ///
    /// A relay worker failure also stops ingestion. In every case the worker
    /// has stopped by the time this returns.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<BridgeReport, BridgeError> {
        let Bridge {
            sender,
            worker_status: _,
            mut worker,
            mut sentinel,
            ingestion,
            metrics,
        } = self;

        let (internal_stop, internal_signal) = shutdown_channel();
        let stop_signal = async move {
            let (mut external, mut internal) = (shutdown, internal_signal);
            tokio::select! {
                _ = external.wait() => info!("Stopping ingestion"),
                _ = internal.wait() => info!("Stopping ingestion after relay worker failure"),
            }
        };

        let state = IngestionState::new(sender, ingestion, metrics);
        let server = serve_ingestion(listener, state, stop_signal);
        tokio::pin!(server);

        let mut joined: Option<Result<Result<WorkerExit, RelayError>, JoinError>> = None;
        let served = tokio::select! {
            served = &mut server => served,
            result = &mut worker => {
                match &result {
                    Ok(Ok(exit)) => info!(reason = %exit, "Relay worker stopped, ingestion keeps running"),
                    Ok(Err(_)) | Err(_) => internal_stop.shutdown(),
                }
                joined = Some(result);
                (&mut server).await
            }
        };

        if let Err(e) = &served {
            error!(error = %e, "Ingestion server failed");
        }

        let sentinel_enqueued = sentinel.fire();
        let joined = match joined {
            Some(result) => result,
            None => worker.await,
        };
        info!(sentinel_enqueued, "The ingestion server has stopped");

        served.map_err(BridgeError::Server)?;
        let worker_exit = joined??;
        let sentinel_sent = sentinel_enqueued && worker_exit == WorkerExit::Shutdown;
        if sentinel_enqueued && !sentinel_sent {
            debug!(reason = %worker_exit, "Relay worker stopped before reaching the shutdown message");
        }

        Ok(BridgeReport {
            worker_exit,
            sentinel_sent,
        })
    }
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod tests;
