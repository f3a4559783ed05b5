//! Relay worker: the single consumer of the bridge channel
//!
//! Takes messages off the queue strictly in order and dispatches each one
//! before looking at the next:
//! - `StatusBatch` goes to the aggregator in one `publish` call
//! - `EntrypointRequest` is answered through the request's own ha_link handle
//! - `Shutdown` stops the worker
//!
//! The worker only ever stops between two dispatches.

use crate::bridge::collaborator::{CollaboratorError, StatusPublisher};
use crate::bridge::message::{BridgeMessage, EntrypointRequest, MessageReceiver};
use crate::bridge::normalize::ServiceStatus;
use crate::server::metrics::SharedMetrics;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Publishing status batch failed: {0}")]
    Publish(#[source] CollaboratorError),

    #[error("Replying to entrypoint request failed: {0}")]
    EntrypointReply(#[source] CollaboratorError),
}

/// What the worker does after answering an entrypoint request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntrypointPolicy {
    /// One entrypoint exchange per worker: stop after replying
    #[default]
    Stop,
    /// Keep relaying status batches after replying
    Continue,
}

/// What the worker does when a collaborator call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollaboratorFailurePolicy {
    /// Stop and hand the error to whoever awaits the worker
    #[default]
    Propagate,
    /// Log the failure and move on to the next message
    LogAndContinue,
}

impl FromStr for EntrypointPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop" => Ok(EntrypointPolicy::Stop),
            "continue" => Ok(EntrypointPolicy::Continue),
            other => Err(format!("expected 'stop' or 'continue', got '{}'", other)),
        }
    }
}

impl FromStr for CollaboratorFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "propagate" => Ok(CollaboratorFailurePolicy::Propagate),
            "log-and-continue" => Ok(CollaboratorFailurePolicy::LogAndContinue),
            other => Err(format!(
                "expected 'propagate' or 'log-and-continue', got '{}'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayWorkerConfig {
    pub entrypoint_policy: EntrypointPolicy,
    pub failure_policy: CollaboratorFailurePolicy,
}

/// Why the worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Received the shutdown sentinel
    Shutdown,
    /// Answered an entrypoint request under [`EntrypointPolicy::Stop`]
    EntrypointReplied,
    /// Every sender was dropped without a sentinel
    ChannelClosed,
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerExit::Shutdown => "shutdown",
            WorkerExit::EntrypointReplied => "entrypoint_replied",
            WorkerExit::ChannelClosed => "channel_closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Stopped,
}

/// Shared, cloneable view of the worker's state
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    stopped: Arc<AtomicBool>,
}

impl WorkerStatus {
    pub fn state(&self) -> WorkerState {
        if self.stopped.load(Ordering::SeqCst) {
            WorkerState::Stopped
        } else {
            WorkerState::Running
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == WorkerState::Stopped
    }

    fn set_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

pub struct RelayWorker {
    receiver: MessageReceiver,
    publisher: Arc<dyn StatusPublisher>,
    config: RelayWorkerConfig,
    status: WorkerStatus,
    metrics: Option<SharedMetrics>,
}

impl RelayWorker {
    pub fn new(
        receiver: MessageReceiver,
        publisher: Arc<dyn StatusPublisher>,
        config: RelayWorkerConfig,
    ) -> Self {
        Self {
            receiver,
            publisher,
            config,
            status: WorkerStatus::default(),
            metrics: None,
        }
    }

    /// Count dispatched messages in `metrics`
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.clone()
    }

    /// Consume messages until a stop condition, then mark the worker STOPPED
    ///
    /// The status flips to STOPPED on every exit path, errors included.
    pub async fn run(mut self) -> Result<WorkerExit, RelayError> {
        info!(
            entrypoint_policy = ?self.config.entrypoint_policy,
            failure_policy = ?self.config.failure_policy,
            "Relay worker started"
        );

        let result = self.consume().await;
        self.status.set_stopped();

        match &result {
            Ok(exit) => info!(reason = %exit, "Relay worker stopped"),
            Err(e) => error!(error = %e, "Relay worker stopped on collaborator failure"),
        }
        result
    }

    async fn consume(&mut self) -> Result<WorkerExit, RelayError> {
        loop {
            debug!("Waiting for the next message");
            let Some(message) = self.receiver.recv().await else {
                warn!("All senders dropped without a shutdown message");
                return Ok(WorkerExit::ChannelClosed);
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_dispatch(message.kind());
            }

            if let Some(exit) = self.dispatch(message).await? {
                return Ok(exit);
            }
        }
    }

    /// Handle one message; `Some` means stop consuming
    async fn dispatch(&self, message: BridgeMessage) -> Result<Option<WorkerExit>, RelayError> {
        match message {
            BridgeMessage::StatusBatch(batch) => {
                self.publish(&batch).await?;
                Ok(None)
            }
            BridgeMessage::EntrypointRequest(request) => {
                self.reply(&request).await?;
                match self.config.entrypoint_policy {
                    EntrypointPolicy::Stop => Ok(Some(WorkerExit::EntrypointReplied)),
                    EntrypointPolicy::Continue => Ok(None),
                }
            }
            BridgeMessage::Shutdown => {
                debug!("Got shutdown message, exiting");
                Ok(Some(WorkerExit::Shutdown))
            }
        }
    }

    async fn publish(&self, batch: &[ServiceStatus]) -> Result<(), RelayError> {
        debug!(count = batch.len(), "Relaying status batch");
        match self.publisher.publish(batch).await {
            Ok(()) => Ok(()),
            Err(e) => self.on_failure(RelayError::Publish(e)),
        }
    }

    async fn reply(&self, request: &EntrypointRequest) -> Result<(), RelayError> {
        info!(
            request_id = ?request.request_id,
            process_fid = ?request.process_fid.map(|f| f.to_string()),
            first = request.is_first_request,
            "Replying to entrypoint request"
        );
        match request.ha_link().reply_to_entrypoint(request).await {
            Ok(()) => Ok(()),
            Err(e) => self.on_failure(RelayError::EntrypointReply(e)),
        }
    }

    fn on_failure(&self, err: RelayError) -> Result<(), RelayError> {
        match self.config.failure_policy {
            CollaboratorFailurePolicy::Propagate => Err(err),
            CollaboratorFailurePolicy::LogAndContinue => {
                error!(error = %err, "Collaborator call failed, continuing");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[path = "worker_test.rs"]
mod tests;
