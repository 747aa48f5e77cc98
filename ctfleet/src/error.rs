//! Error types for ctfleet.

use std::fmt;

use thiserror::Error;

use crate::descriptor::ResourceId;
use crate::state::ObservedStatus;

/// Errors returned by a hypervisor client call.
///
/// The split decides whether the reconciler retries: transient errors go
/// through the backoff loop, fatal errors surface immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Timeout, 5xx, throttling or a broken connection.
    #[error("transient: {0}")]
    Transient(String),

    /// Authorization, validation or any other non-retryable rejection.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Transient(m) | ApiError::Fatal(m) => m,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            return ApiError::Transient(e.to_string());
        }
        if e.is_decode() && !is_malformed_json(&e) {
            // The body was cut off while reading, not rejected by the parser.
            return ApiError::Transient(e.to_string());
        }
        match e.status() {
            Some(s) if s.is_server_error() || s.as_u16() == 429 => ApiError::Transient(e.to_string()),
            // Body decode errors and anything else the server will keep doing.
            _ => ApiError::Fatal(e.to_string()),
        }
    }
}

/// True when a decode error comes from a complete but invalid JSON document.
fn is_malformed_json(e: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(json) = err.downcast_ref::<serde_json::Error>() {
            return !(json.is_eof() || json.is_io());
        }
        source = err.source();
    }
    false
}

/// Client operation, used to label errors and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Query,
    Config,
    Create,
    Start,
    Stop,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Query => "query",
            Operation::Config => "config",
            Operation::Create => "create",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A single field where the existing resource differs from the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDrift {
    pub field: &'static str,
    pub existing: String,
    pub desired: String,
}

impl fmt::Display for FieldDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} != {}", self.field, self.existing, self.desired)
    }
}

/// Why a reconciliation ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("{op} failed after {attempts} attempts: {message}")]
    TransientApi {
        op: Operation,
        attempts: u32,
        message: String,
    },

    #[error("{op} rejected: {message}")]
    FatalApi { op: Operation, message: String },

    #[error("resource {id} exists with a different configuration ({})", format_drift(.drift))]
    ResourceConflict { id: ResourceId, drift: Vec<FieldDrift> },

    #[error("{address}:{port} not reachable after {attempts} attempts")]
    ReadinessTimeout {
        address: String,
        port: u16,
        attempts: u32,
    },

    #[error("{op} did not settle: expected {expected}, observed {observed}")]
    SettleTimeout {
        op: Operation,
        expected: ObservedStatus,
        observed: ObservedStatus,
    },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),

    #[error("cancelled")]
    Cancelled,

    #[error("reconciliation task aborted: {0}")]
    Aborted(String),
}

impl ReconcileError {
    /// Stable short name for report lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::TransientApi { .. } => "transient_api",
            ReconcileError::FatalApi { .. } => "fatal_api",
            ReconcileError::ResourceConflict { .. } => "resource_conflict",
            ReconcileError::ReadinessTimeout { .. } => "readiness_timeout",
            ReconcileError::SettleTimeout { .. } => "settle_timeout",
            ReconcileError::InvalidDescriptor(_) => "invalid_descriptor",
            ReconcileError::Cancelled => "cancelled",
            ReconcileError::Aborted(_) => "aborted",
        }
    }

    pub(crate) fn from_api(op: Operation, attempts: u32, err: ApiError) -> Self {
        match err {
            ApiError::Transient(message) => ReconcileError::TransientApi {
                op,
                attempts,
                message,
            },
            ApiError::Fatal(message) => ReconcileError::FatalApi { op, message },
        }
    }
}

fn format_drift(drift: &[FieldDrift]) -> String {
    drift
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Descriptor validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("resource id must be non-zero")]
    ZeroId,

    #[error("resource {id}: invalid hostname {hostname:?}")]
    InvalidHostname { id: ResourceId, hostname: String },

    #[error("resource {id}: {field} must be greater than zero")]
    ZeroCapacity { id: ResourceId, field: &'static str },

    #[error("resource {id}: invalid address {value:?}")]
    InvalidAddress { id: ResourceId, value: String },

    #[error("resource {id}: mount {index} has an empty {field}")]
    EmptyMountPath {
        id: ResourceId,
        index: usize,
        field: &'static str,
    },
}

/// Fleet configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Fleet(#[from] FleetError),
}

/// Errors rejecting a fleet batch before any call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FleetError {
    #[error("resource id {0} appears more than once in the batch")]
    DuplicateId(ResourceId),
}

/// Result type for hypervisor client calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
