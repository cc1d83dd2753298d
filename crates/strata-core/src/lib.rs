//! Core snapshot engine for Strata.
//!
//! This crate ties the transactional metadata store to the snapshot lineage
//! model: the `Snapshotter` contract, the `Engine` that implements it over
//! one namespace, the lineage table that enforces parent/child invariants,
//! and the mount builder that turns a lineage chain into ordered mount
//! descriptors. It also provides store locking, cancellation, process
//! diagnostics, and engine configuration.

pub mod concurrency;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod lifecycle;
pub mod lineage;
pub mod mounts;
pub mod snapshotter;
pub mod verify;

pub use concurrency::{
    install_signal_handler, shutdown_requested, shutdown_token, CancelToken, StoreLock,
};
pub use config::EngineConfig;
pub use diagnostics::{render_memory, DebugInfo, Diagnostics, MemStats, ProcessDiagnostics};
pub use engine::{CleanupReport, CounterSnapshot, Engine, EngineCounters};
pub use lifecycle::{validate_operation, Operation};
pub use lineage::{Lineage, SnapshotRecord};
pub use mounts::{build_mounts, overlay, Mount};
pub use snapshotter::{Info, Kind, Snapshotter};
pub use verify::{lineage_stats, verify_lineage, LineageReport, LineageStats, LineageViolation};

use std::fmt;
use strata_store::{BoxError, StoreError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    NotEmpty,
    /// The record's kind or readonly flag does not allow the operation.
    InvalidState,
    InvalidArgument,
    Cancelled,
    /// A concurrent transaction touched the same keys. Retried by the engine
    /// and never returned from a public operation.
    Conflict,
    /// A retried operation kept conflicting.
    Failed,
    Storage,
}

impl ErrorKind {
    /// Find the first snapshot error kind in an error's source chain.
    /// Store errors found along the way are mapped onto engine kinds.
    pub fn of(err: &(dyn std::error::Error + 'static)) -> Option<ErrorKind> {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(snap) = e.downcast_ref::<SnapshotError>() {
                return Some(snap.kind());
            }
            if let Some(store) = e.downcast_ref::<StoreError>() {
                return Some(ErrorKind::from(store.kind()));
            }
            current = e.source();
        }
        None
    }

    /// Whether the failure is the caller's to handle: a constraint on the
    /// lineage rather than a storage or concurrency fault.
    pub fn is_constraint(self) -> bool {
        matches!(
            self,
            ErrorKind::AlreadyExists
                | ErrorKind::NotFound
                | ErrorKind::NotEmpty
                | ErrorKind::InvalidState
        )
    }
}

impl From<strata_store::ErrorKind> for ErrorKind {
    fn from(kind: strata_store::ErrorKind) -> Self {
        use strata_store::ErrorKind as S;
        match kind {
            S::AlreadyExists => ErrorKind::AlreadyExists,
            S::NotFound => ErrorKind::NotFound,
            S::NotEmpty => ErrorKind::NotEmpty,
            S::Conflict => ErrorKind::Conflict,
            S::Cancelled => ErrorKind::Cancelled,
            S::InvalidArgument => ErrorKind::InvalidArgument,
            S::Corrupt | S::VersionMismatch | S::Io => ErrorKind::Storage,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::NotFound => "not found",
            ErrorKind::NotEmpty => "not empty",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Failed => "failed",
            ErrorKind::Storage => "storage error",
        };
        f.write_str(s)
    }
}

/// Error returned by every engine operation. Match on [`SnapshotError::kind`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SnapshotError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl SnapshotError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn not_empty(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotEmpty, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == ErrorKind::AlreadyExists
    }
}

impl From<StoreError> for SnapshotError {
    fn from(e: StoreError) -> Self {
        let kind = ErrorKind::from(e.kind());
        let message = e.message().to_owned();
        Self::with_source(kind, message, e)
    }
}

impl From<std::io::Error> for SnapshotError {
    fn from(e: std::io::Error) -> Self {
        let message = format!("I/O error: {e}");
        Self::with_source(ErrorKind::Storage, message, e)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(e: serde_json::Error) -> Self {
        let message = format!("corrupt snapshot record: {e}");
        Self::with_source(ErrorKind::Storage, message, e)
    }
}
