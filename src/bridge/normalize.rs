//! Service-health report normalization
//!
//! Turns a decoded health report (a list of service entries, each with its
//! health checks) into one [`ServiceStatus`] per entry, in input order.
//! A service is online only when every one of its checks is `"passing"`;
//! a service with no checks is online.

use crate::cluster::{Fid, FidParseError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The check status value that counts as healthy
pub const PASSING: &str = "passing";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Service entry {index} has no Service.ID")]
    MissingServiceId { index: usize },

    #[error("Service entry {index} has a malformed ID: {source}")]
    InvalidServiceId {
        index: usize,
        #[source]
        source: FidParseError,
    },

    #[error("Service entry {index} is not a valid service entry: {reason}")]
    MalformedEntry { index: usize, reason: String },
}

/// One entry of an inbound health report
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceEntry {
    #[serde(rename = "Service", default)]
    pub service: Option<ServiceDescriptor>,

    /// Absent checks are treated like an empty list
    #[serde(rename = "Checks", default)]
    pub checks: Option<Vec<HealthCheck>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceDescriptor {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
}

/// A single health check; only its status matters here
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthCheck {
    #[serde(rename = "Status", default)]
    pub status: Option<Value>,
}

impl HealthCheck {
    fn is_passing(&self) -> bool {
        matches!(&self.status, Some(Value::String(s)) if s == PASSING)
    }
}

/// Decoded report body. `null` decodes to `None`.
///
/// Entries stay untyped until [`normalize`] so a badly shaped entry fails the
/// report instead of failing the JSON decode.
pub type HealthReport = Option<Vec<Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Online,
    Offline,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Online => "online",
            HealthStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical status of one service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceStatus {
    #[serde(rename = "fid")]
    pub identifier: Fid,
    pub status: HealthStatus,
}

/// Classify a check list: online iff every check is passing (vacuously true when empty)
pub fn classify_checks(checks: &[HealthCheck]) -> HealthStatus {
    if checks.iter().all(HealthCheck::is_passing) {
        HealthStatus::Online
    } else {
        HealthStatus::Offline
    }
}

/// Normalize a decoded report
///
/// Fails the whole report on the first entry that is badly shaped or whose
/// identifier is missing or malformed, so no partial batch ever leaves this function.
pub fn normalize(report: Option<&[Value]>) -> Result<Vec<ServiceStatus>, NormalizeError> {
    let Some(entries) = report else {
        return Ok(Vec::new());
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let entry = ServiceEntry::deserialize(raw).map_err(|e| NormalizeError::MalformedEntry {
                index,
                reason: e.to_string(),
            })?;

            let raw_id = entry
                .service
                .as_ref()
                .and_then(|s| s.id.as_deref())
                .ok_or(NormalizeError::MissingServiceId { index })?;

            let identifier = Fid::parse(raw_id)
                .map_err(|source| NormalizeError::InvalidServiceId { index, source })?;

            let status = classify_checks(entry.checks.as_deref().unwrap_or_default());

            Ok(ServiceStatus { identifier, status })
        })
        .collect()
}

#[cfg(test)]
#[path = "normalize_test.rs"]
mod tests;
