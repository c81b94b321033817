//! Error types for tablekeeper

use crate::common::types::{TableName, TableState};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Lifecycle preconditions ===
    #[error("Table not found: {0}")]
    TableNotFound(TableName),

    #[error("Table {table} is not disabled (state: {})", state_label(.state))]
    TableNotDisabled {
        table: TableName,
        state: Option<TableState>,
    },

    // === Lifecycle faults ===
    #[error("Coordination failure: {0}")]
    Coordination(String),

    #[error("Placement execution failed: {0}")]
    Execution(String),

    #[error("Enable of table {0} was cancelled during placement")]
    Cancelled(TableName),

    #[error("Enable of table {table} did not finish within {after:?}")]
    DeadlineExceeded {
        table: TableName,
        after: std::time::Duration,
    },

    #[error("Hook {hook} failed: {reason}")]
    Hook { hook: String, reason: String },

    // === Placement Errors ===
    #[error("No live servers available for placement")]
    NoLiveServers,

    // === Metadata Errors ===
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Metadata corrupted: {0}")]
    MetadataCorrupted(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

fn state_label(state: &Option<TableState>) -> String {
    state
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Coarse classification of an [`Error`], used by callers to tell expected
/// outcomes apart from infrastructure faults without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    NotDisabled,
    CoordinationFailure,
    ExecutionFailure,
    Cancelled,
    HookFailure,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TableNotFound(_) => ErrorKind::NotFound,
            Error::TableNotDisabled { .. } => ErrorKind::NotDisabled,
            Error::Coordination(_) | Error::RocksDb(_) | Error::MetadataCorrupted(_) => {
                ErrorKind::CoordinationFailure
            }
            Error::Execution(_) | Error::NoLiveServers => ErrorKind::ExecutionFailure,
            Error::Cancelled(_) | Error::DeadlineExceeded { .. } => ErrorKind::Cancelled,
            Error::Hook { .. } => ErrorKind::HookFailure,
            _ => ErrorKind::Other,
        }
    }

    /// Expected outcome of a well-formed request (bad precondition), as
    /// opposed to a fault in the cluster.
    pub fn is_expected(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::NotDisabled)
    }

    /// Is this a retryable error? Nothing retries inside the coordinator;
    /// this only advises the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::CoordinationFailure | ErrorKind::Cancelled
        )
    }

    /// Wrap a failure of the lock service or the durable state store.
    pub fn coordination(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Coordination(format!("{}: {}", context, err))
    }

    /// Attribute an error raised by an extension hook to that hook.
    pub fn into_hook(self, hook: &str) -> Self {
        match self {
            Error::Hook { .. } => self,
            other => Error::Hook {
                hook: hook.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::MetadataCorrupted(e.to_string())
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}
