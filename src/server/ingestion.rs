//! HTTP ingestion endpoint for service-health reports
//!
//! - `GET /` - liveness: `{"message": "I am alive"}`
//! - `HEAD /` - liveness, headers only
//! - `POST /` - a JSON array of `{Service: {ID}, Checks: [{Status}]}` entries
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! A report is normalized and enqueued for the relay worker before it is
//! acknowledged, so a 200 means the batch is already in the worker's queue.

use crate::bridge::message::MessageSender;
use crate::bridge::normalize::{normalize, HealthReport, NormalizeError};
use crate::server::metrics::SharedMetrics;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::str::FromStr;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default cap on a report body
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// What to do with a body that is not valid JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeFailurePolicy {
    /// Log it, relay an empty batch and acknowledge
    #[default]
    AcceptEmpty,
    /// Answer 400 and enqueue nothing
    Reject,
}

impl FromStr for DecodeFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept-empty" => Ok(DecodeFailurePolicy::AcceptEmpty),
            "reject" => Ok(DecodeFailurePolicy::Reject),
            other => Err(format!("expected 'accept-empty' or 'reject', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionConfig {
    pub max_body_bytes: usize,
    pub decode_failure: DecodeFailurePolicy,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            decode_failure: DecodeFailurePolicy::default(),
        }
    }
}

/// Reasons a delivery is not acknowledged
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Content-Length header is required")]
    LengthRequired,

    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("Report of {declared} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { declared: usize, limit: usize },

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("Report is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("Invalid report: {0}")]
    InvalidReport(#[from] NormalizeError),

    #[error("Relay worker has stopped")]
    WorkerStopped,
}

impl IngestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::LengthRequired => StatusCode::LENGTH_REQUIRED,
            IngestError::InvalidContentLength(_)
            | IngestError::BodyRead(_)
            | IngestError::MalformedJson(_) => StatusCode::BAD_REQUEST,
            IngestError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            IngestError::InvalidReport(_) => StatusCode::UNPROCESSABLE_ENTITY,
            IngestError::WorkerStopped => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Metric label
    fn outcome(&self) -> &'static str {
        match self {
            IngestError::WorkerStopped => "unavailable",
            IngestError::InvalidReport(_) => "invalid_report",
            _ => "rejected",
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Acknowledgment body for an accepted report
#[derive(Debug, Serialize)]
pub struct IngestAck {
    pub delivery_id: String,
    pub services: usize,
}

#[derive(Clone)]
pub struct IngestionState {
    sender: MessageSender,
    config: IngestionConfig,
    metrics: SharedMetrics,
}

impl IngestionState {
    pub fn new(sender: MessageSender, config: IngestionConfig, metrics: SharedMetrics) -> Self {
        Self {
            sender,
            config,
            metrics,
        }
    }
}

async fn liveness() -> Json<serde_json::Value> {
    Json(json!({ "message": "I am alive" }))
}

async fn liveness_head() -> impl IntoResponse {
    (StatusCode::OK, [(CONTENT_TYPE, "application/json")])
}

async fn metrics(State(state): State<IngestionState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Failed to encode metrics: {}", e) })),
        )
            .into_response(),
    }
}

fn declared_length(headers: &HeaderMap, limit: usize) -> Result<usize, IngestError> {
    let raw = headers
        .get(CONTENT_LENGTH)
        .ok_or(IngestError::LengthRequired)?;
    let declared = raw
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .ok_or_else(|| IngestError::InvalidContentLength(format!("{:?}", raw)))?;

    if declared > limit {
        return Err(IngestError::PayloadTooLarge { declared, limit });
    }
    Ok(declared)
}

/// Decode the body according to the configured policy
fn decode_report(
    body: &[u8],
    policy: DecodeFailurePolicy,
    delivery_id: &Uuid,
) -> Result<HealthReport, IngestError> {
    match serde_json::from_slice::<HealthReport>(body) {
        Ok(report) => Ok(report),
        Err(e) => match policy {
            DecodeFailurePolicy::AcceptEmpty => {
                warn!(%delivery_id, error = %e, "Not a valid JSON report, relaying it as empty");
                Ok(None)
            }
            DecodeFailurePolicy::Reject => Err(IngestError::MalformedJson(e.to_string())),
        },
    }
}

async fn receive_report(state: &IngestionState, request: Request) -> Result<IngestAck, IngestError> {
    let delivery_id = Uuid::new_v4();
    let (parts, body) = request.into_parts();

    let declared = declared_length(&parts.headers, state.config.max_body_bytes)?;
    let bytes = axum::body::to_bytes(body, state.config.max_body_bytes)
        .await
        .map_err(|e| IngestError::BodyRead(e.to_string()))?;
    debug!(%delivery_id, declared, received = bytes.len(), "A new report has been received");

    let report = decode_report(&bytes, state.config.decode_failure, &delivery_id)?;
    let statuses = normalize(report.as_deref())?;
    let services = statuses.len();

    info!(%delivery_id, services, "Enqueueing service states");
    state
        .sender
        .send_status_batch(statuses)
        .map_err(|_| IngestError::WorkerStopped)?;

    Ok(IngestAck {
        delivery_id: delivery_id.to_string(),
        services,
    })
}

/// POST handler: acknowledge only after the batch has been enqueued
async fn ingest(State(state): State<IngestionState>, request: Request<Body>) -> Response {
    match receive_report(&state, request).await {
        Ok(ack) => {
            state.metrics.record_delivery("accepted");
            (StatusCode::OK, Json(ack)).into_response()
        }
        Err(e) => {
            warn!(error = %e, status = %e.status_code(), "Report not accepted");
            state.metrics.record_delivery(e.outcome());
            e.into_response()
        }
    }
}

/// Build the router for the ingestion, liveness, and metrics endpoints
pub fn build_router(state: IngestionState) -> Router {
    Router::new()
        .route("/", get(liveness).head(liveness_head).post(ingest))
        .route("/metrics", get(self::metrics))
        .with_state(state)
}

/// Serve the ingestion endpoint on `listener` until `stop` resolves
///
/// In-flight requests are allowed to finish before this returns.
pub async fn serve_ingestion<F>(
    listener: TcpListener,
    state: IngestionState,
    stop: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Ingestion server listening (HTTP)");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(stop)
        .await
}

#[cfg(test)]
#[path = "ingestion_test.rs"]
mod tests;
