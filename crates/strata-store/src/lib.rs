//! Namespaced transactional metadata store and on-disk layout for Strata.
//!
//! This crate provides the storage layer underneath the snapshot engine:
//! `StoreLayout` for directory structure management, `MetadataStore` for
//! namespaced key/value records with optimistic transactions, and the redo
//! `Journal` that makes a multi-key commit atomic across crashes.
//!
//! Every failure is reported as a [`StoreError`] tagged with an [`ErrorKind`];
//! callers match on the kind instead of probing the error's concrete type.

pub mod journal;
pub mod layout;
pub mod metadata;
pub mod types;

pub use journal::{next_txid, Journal, JournalEntry, JournalOp};
pub use layout::{StoreLayout, LOCK_STRIPES, STORE_FORMAT_VERSION};
pub use metadata::{validate_namespace, MetadataStore, Namespace, Transaction};
pub use types::{NamespaceName, SnapshotId, SnapshotKey};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Boxed cause carried by store and engine errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Fsync a directory so that a preceding `rename()` or `unlink()` is durable.
///
/// POSIX does not promise that a rename survives a crash until the parent
/// directory itself has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

pub(crate) fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub(crate) fn decode(text: &str) -> Result<Vec<u8>, StoreError> {
    STANDARD.decode(text).map_err(|e| {
        StoreError::with_source(ErrorKind::Corrupt, "invalid base64 in stored record", e)
    })
}

/// Lock stripe guarding `key`. Keys hash onto a fixed set of lock files so
/// the lock directory stays bounded no matter how many keys come and go.
pub(crate) fn stripe_of(key: &[u8]) -> u32 {
    let hash = blake3::hash(key);
    u32::from(hash.as_bytes()[0]) % LOCK_STRIPES
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    NotEmpty,
    /// Another transaction changed a key this one read. Safe to retry.
    Conflict,
    Cancelled,
    InvalidArgument,
    Corrupt,
    VersionMismatch,
    Io,
}

impl ErrorKind {
    /// Find the first store error kind in an error's source chain.
    pub fn of(err: &(dyn std::error::Error + 'static)) -> Option<ErrorKind> {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(store) = e.downcast_ref::<StoreError>() {
                return Some(store.kind());
            }
            current = e.source();
        }
        None
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::AlreadyExists => write!(f, "already exists"),
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::NotEmpty => write!(f, "not empty"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::InvalidArgument => write!(f, "invalid argument"),
            ErrorKind::Corrupt => write!(f, "corrupt"),
            ErrorKind::VersionMismatch => write!(f, "version mismatch"),
            ErrorKind::Io => write!(f, "I/O error"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct StoreError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl StoreError {
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

    /// An item already exists in metadata. An empty message selects the default.
    pub fn exists(msg: &str) -> Self {
        Self::new(ErrorKind::AlreadyExists, or_default(msg, "metadata: exists"))
    }

    /// An item cannot be found in metadata. An empty message selects the default.
    pub fn not_found(msg: &str) -> Self {
        Self::new(ErrorKind::NotFound, or_default(msg, "metadata: not found"))
    }

    /// An item cannot be deleted because it still holds entries.
    pub fn not_empty(msg: &str) -> Self {
        Self::new(
            ErrorKind::NotEmpty,
            or_default(msg, "metadata: namespace not empty"),
        )
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

fn or_default(msg: &str, default: &str) -> String {
    if msg.is_empty() {
        default.to_owned()
    } else {
        msg.to_owned()
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        let message = format!("store I/O error: {e}");
        Self::with_source(ErrorKind::Io, message, e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        let message = format!("serialization error: {e}");
        Self::with_source(ErrorKind::Corrupt, message, e)
    }
}
