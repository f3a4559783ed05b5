//! Messages carried from producers to the relay worker, and the channel that carries them
//!
//! The channel is unbounded and strictly FIFO: many producers (one per
//! inbound connection, plus ha_link for entrypoint requests) and exactly one
//! consumer. Enqueueing never waits on the consumer; it fails only once the
//! consumer has gone away.

use crate::bridge::collaborator::EntrypointReplier;
use crate::bridge::normalize::ServiceStatus;
use crate::cluster::Fid;
use crate::server::metrics::SharedMetrics;
use prometheus::IntGauge;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque token identifying the RPC exchange an entrypoint reply belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplyContext(pub u64);

/// A client's request for the cluster entrypoint
///
/// The ha_link handle is fixed at construction, so a request can never reach
/// the worker without a way to reply. Everything else is optional.
#[derive(Clone)]
pub struct EntrypointRequest {
    pub reply_context: Option<ReplyContext>,
    pub request_id: Option<String>,
    pub remote_endpoint: Option<String>,
    pub process_fid: Option<Fid>,
    pub source_revision: Option<String>,
    pub pid: Option<u32>,
    pub is_first_request: bool,
    ha_link: Arc<dyn EntrypointReplier>,
}

impl EntrypointRequest {
    pub fn new(ha_link: Arc<dyn EntrypointReplier>) -> Self {
        Self {
            reply_context: None,
            request_id: None,
            remote_endpoint: None,
            process_fid: None,
            source_revision: None,
            pid: None,
            is_first_request: false,
            ha_link,
        }
    }

    /// The collaborator that will send the reply
    pub fn ha_link(&self) -> &Arc<dyn EntrypointReplier> {
        &self.ha_link
    }

    pub fn with_reply_context(mut self, reply_context: ReplyContext) -> Self {
        self.reply_context = Some(reply_context);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_remote_endpoint(mut self, remote_endpoint: impl Into<String>) -> Self {
        self.remote_endpoint = Some(remote_endpoint.into());
        self
    }

    pub fn with_process_fid(mut self, process_fid: Fid) -> Self {
        self.process_fid = Some(process_fid);
        self
    }

    pub fn with_source_revision(mut self, source_revision: impl Into<String>) -> Self {
        self.source_revision = Some(source_revision.into());
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn first_request(mut self, is_first_request: bool) -> Self {
        self.is_first_request = is_first_request;
        self
    }
}

impl fmt::Debug for EntrypointRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntrypointRequest")
            .field("reply_context", &self.reply_context)
            .field("request_id", &self.request_id)
            .field("remote_endpoint", &self.remote_endpoint)
            .field("process_fid", &self.process_fid)
            .field("source_revision", &self.source_revision)
            .field("pid", &self.pid)
            .field("is_first_request", &self.is_first_request)
            .finish_non_exhaustive()
    }
}

/// Everything the relay worker can receive
#[derive(Debug)]
pub enum BridgeMessage {
    /// Normalized statuses from one inbound report, in report order
    StatusBatch(Vec<ServiceStatus>),
    EntrypointRequest(EntrypointRequest),
    /// Sentinel: stop consuming
    Shutdown,
}

impl BridgeMessage {
    /// Metric/log label for the variant
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeMessage::StatusBatch(_) => "status_batch",
            BridgeMessage::EntrypointRequest(_) => "entrypoint_request",
            BridgeMessage::Shutdown => "shutdown",
        }
    }
}

/// Returned when the relay worker has stopped and dropped its receiver
#[derive(Debug, Error)]
#[error("Relay worker is no longer receiving messages")]
pub struct ChannelClosed(pub BridgeMessage);

/// Producer handle; clone one per producer
#[derive(Clone)]
pub struct MessageSender {
    tx: mpsc::UnboundedSender<BridgeMessage>,
    depth: Option<IntGauge>,
}

impl MessageSender {
    pub(crate) fn send(&self, message: BridgeMessage) -> Result<(), ChannelClosed> {
        // Count before sending so the consumer can never observe a negative depth
        if let Some(depth) = &self.depth {
            depth.inc();
        }
        self.tx.send(message).map_err(|e| {
            if let Some(depth) = &self.depth {
                depth.dec();
            }
            ChannelClosed(e.0)
        })
    }

    /// Enqueue the statuses of one report
    pub fn send_status_batch(&self, batch: Vec<ServiceStatus>) -> Result<(), ChannelClosed> {
        self.send(BridgeMessage::StatusBatch(batch))
    }

    /// Enqueue an entrypoint request for the worker to answer
    pub fn send_entrypoint_request(&self, request: EntrypointRequest) -> Result<(), ChannelClosed> {
        self.send(BridgeMessage::EntrypointRequest(request))
    }

    /// Only the lifecycle coordinator sends the sentinel
    pub(crate) fn send_shutdown(&self) -> Result<(), ChannelClosed> {
        self.send(BridgeMessage::Shutdown)
    }

    /// True once the receiving side is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for MessageSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Consumer handle; exactly one exists per channel
pub struct MessageReceiver {
    rx: mpsc::UnboundedReceiver<BridgeMessage>,
    depth: Option<IntGauge>,
}

impl MessageReceiver {
    /// Wait for the next message; `None` once every sender is gone and the queue is drained
    pub async fn recv(&mut self) -> Option<BridgeMessage> {
        let message = self.rx.recv().await?;
        if let Some(depth) = &self.depth {
            depth.dec();
        }
        Some(message)
    }

    /// Take the next message if one is already queued
    pub fn try_recv(&mut self) -> Option<BridgeMessage> {
        let message = self.rx.try_recv().ok()?;
        if let Some(depth) = &self.depth {
            depth.dec();
        }
        Some(message)
    }
}

/// Create a channel without metrics
pub fn message_channel() -> (MessageSender, MessageReceiver) {
    build_channel(None)
}

/// Create a channel whose queue depth is exported through `metrics`
pub fn message_channel_with_metrics(metrics: &SharedMetrics) -> (MessageSender, MessageReceiver) {
    build_channel(Some(metrics.queue_depth()))
}

fn build_channel(depth: Option<IntGauge>) -> (MessageSender, MessageReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MessageSender {
            tx,
            depth: depth.clone(),
        },
        MessageReceiver { rx, depth },
    )
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
