//! Error types for the DR sync engine
//!
//! Every error carries the partition, operation or raw value it is about, so
//! that the run report never has to fall back to an opaque aggregate failure.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the reconciliation engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Identity Errors
    // =========================================================================
    #[error("Malformed {field} value {raw:?}: {reason}")]
    Format {
        field: String,
        raw: String,
        reason: String,
    },

    // =========================================================================
    // Source Errors
    // =========================================================================
    #[error("Source unavailable: {source_name} - {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("Call to {source_name} timed out after {timeout:?}: {operation}")]
    Timeout {
        source_name: String,
        operation: String,
        timeout: Duration,
    },

    #[error("Array operation failed on {array}: {operation}: {reason}")]
    ArrayOperation {
        array: String,
        operation: String,
        reason: String,
    },

    // =========================================================================
    // Reconciliation Errors
    // =========================================================================
    #[error("Divergent state on {host}: {detail}")]
    DivergentState { host: String, detail: String },

    #[error("LUN {lun} is not mapped to host {host}")]
    LunMappingMissing { host: String, lun: String },

    #[error("Snapshot set {set_name} not replicated: {reason}")]
    SnapshotReplication { set_name: String, reason: String },

    #[error("Consistency violation for partition {partition}: {detail}")]
    ConsistencyViolation { partition: String, detail: String },

    #[error("Run already in progress for managed system {managed_system}")]
    RunInProgress { managed_system: String },

    #[error("Managed system {managed_system} is not ready: {reason}")]
    NotReady {
        managed_system: String,
        reason: String,
    },

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How far an error propagates inside one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    /// Confined to one partition; other partitions keep reconciling
    Partition,
    /// Aborts the whole run for the managed system
    Session,
    /// Prevents the run from starting at all
    Run,
}

impl Error {
    /// Determine how far this error propagates
    pub fn scope(&self) -> ErrorScope {
        match self {
            Error::Format { .. }
            | Error::DivergentState { .. }
            | Error::ConsistencyViolation { .. } => ErrorScope::Partition,

            Error::RunInProgress { .. } | Error::Configuration(_) => ErrorScope::Run,

            _ => ErrorScope::Session,
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable { .. } | Error::Timeout { .. }
        )
    }

    /// Check if this error is retryable
    ///
    /// Only transient source failures are retried. A malformed identifier or a
    /// divergent binding will not fix itself between two attempts.
    pub fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    /// Short stable name of the error kind, used in reports and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Internal(_) => "internal",
            Error::Configuration(_) => "configuration",
            Error::Format { .. } => "format",
            Error::SourceUnavailable { .. } => "source_unavailable",
            Error::Timeout { .. } => "timeout",
            Error::ArrayOperation { .. } => "array_operation",
            Error::DivergentState { .. } => "divergent_state",
            Error::LunMappingMissing { .. } => "lun_mapping_missing",
            Error::SnapshotReplication { .. } => "snapshot_replication",
            Error::ConsistencyViolation { .. } => "consistency_violation",
            Error::RunInProgress { .. } => "run_in_progress",
            Error::NotReady { .. } => "not_ready",
            Error::JsonParse(_) => "json_parse",
            Error::YamlParse(_) => "yaml_parse",
            Error::Io(_) => "io",
        }
    }
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;
