//! Interfaces to the components the relay worker hands messages to
//!
//! - [`StatusPublisher`]: the cluster health-state aggregator
//! - [`EntrypointReplier`]: ha_link, which answers a waiting entrypoint client
//!
//! Production wiring plugs the real aggregator in; tests use the in-memory
//! mocks below, which record every call for assertions.

use crate::bridge::message::EntrypointRequest;
use crate::bridge::normalize::ServiceStatus;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Aggregator rejected status batch: {0}")]
    PublishFailed(String),

    #[error("Entrypoint reply failed: {0}")]
    ReplyFailed(String),
}

/// Receives normalized service statuses, one whole batch per call
///
/// Must tolerate empty batches.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, records: &[ServiceStatus]) -> Result<(), CollaboratorError>;
}

/// Delivers the reply for an entrypoint request back to its original caller
#[async_trait]
pub trait EntrypointReplier: Send + Sync {
    async fn reply_to_entrypoint(&self, request: &EntrypointRequest)
        -> Result<(), CollaboratorError>;
}

/// Publisher that only logs the statuses it receives
///
/// Used by the standalone binary where no aggregator is attached.
#[derive(Debug, Default, Clone)]
pub struct TracingPublisher;

#[async_trait]
impl StatusPublisher for TracingPublisher {
    async fn publish(&self, records: &[ServiceStatus]) -> Result<(), CollaboratorError> {
        info!(count = records.len(), "Publishing service states");
        for record in records {
            debug!(fid = %record.identifier, status = %record.status, "Service state");
        }
        Ok(())
    }
}

/// Mock publisher recording every batch
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockPublisher {
    batches: std::sync::Arc<std::sync::Mutex<Vec<Vec<ServiceStatus>>>>,
    fail: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish call fail (the batch is still recorded)
    pub fn fail_publishes(&self) {
        self.fail.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn published_batches(&self) -> Vec<Vec<ServiceStatus>> {
        self.batches.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl StatusPublisher for MockPublisher {
    async fn publish(&self, records: &[ServiceStatus]) -> Result<(), CollaboratorError> {
        #[allow(clippy::unwrap_used)]
        self.batches.lock().unwrap().push(records.to_vec());
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CollaboratorError::PublishFailed("mock failure".to_string()));
        }
        Ok(())
    }
}

/// Snapshot of the fields of an entrypoint request a mock replier saw
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct SeenEntrypoint {
    pub reply_context: Option<crate::bridge::message::ReplyContext>,
    pub request_id: Option<String>,
    pub remote_endpoint: Option<String>,
    pub process_fid: Option<crate::cluster::Fid>,
    pub source_revision: Option<String>,
    pub pid: Option<u32>,
    pub is_first_request: bool,
}

/// Mock ha_link recording every entrypoint reply
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockReplier {
    replies: std::sync::Arc<std::sync::Mutex<Vec<SeenEntrypoint>>>,
    fail: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockReplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_replies(&self) {
        self.fail.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn replies(&self) -> Vec<SeenEntrypoint> {
        self.replies.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl EntrypointReplier for MockReplier {
    async fn reply_to_entrypoint(
        &self,
        request: &EntrypointRequest,
    ) -> Result<(), CollaboratorError> {
        #[allow(clippy::unwrap_used)]
        self.replies.lock().unwrap().push(SeenEntrypoint {
            reply_context: request.reply_context,
            request_id: request.request_id.clone(),
            remote_endpoint: request.remote_endpoint.clone(),
            process_fid: request.process_fid,
            source_revision: request.source_revision.clone(),
            pid: request.pid,
            is_first_request: request.is_first_request,
        });
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CollaboratorError::ReplyFailed("mock failure".to_string()));
        }
        Ok(())
    }
}
