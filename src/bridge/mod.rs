//! Producer/consumer handoff between the ingestion endpoint and the cluster
//!
//! Reports are normalized, wrapped in a [`BridgeMessage`], and queued for a
//! single [`RelayWorker`] that forwards them to the aggregator. The
//! [`Bridge`] coordinator ties the lifecycle of the two together.

pub mod collaborator;
pub mod coordinator;
pub mod message;
pub mod normalize;
pub mod worker;

pub use collaborator::{CollaboratorError, EntrypointReplier, StatusPublisher, TracingPublisher};
pub use coordinator::{Bridge, BridgeError, BridgeReport};
pub use message::{
    message_channel, message_channel_with_metrics, BridgeMessage, ChannelClosed,
    EntrypointRequest, MessageReceiver, MessageSender, ReplyContext,
};
pub use normalize::{normalize, HealthStatus, NormalizeError, ServiceStatus};
pub use worker::{
    CollaboratorFailurePolicy, EntrypointPolicy, RelayError, RelayWorker, RelayWorkerConfig,
    WorkerExit, WorkerState, WorkerStatus,
};
