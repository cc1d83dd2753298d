use crate::concurrency::CancelToken;
use crate::mounts::Mount;
use crate::SnapshotError;
use serde::{Deserialize, Serialize};
use std::fmt;
use strata_store::SnapshotKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// Mutable through its mounts. Created by prepare or view.
    Active,
    /// Immutable. The only kind that may act as a parent.
    Committed,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Active => write!(f, "active"),
            Kind::Committed => write!(f, "committed"),
        }
    }
}

/// Public view of one snapshot record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub name: SnapshotKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<SnapshotKey>,
    pub kind: Kind,
    pub readonly: bool,
    pub children: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// The snapshot contract consumed by image and container assembly.
///
/// An empty `parent` means the snapshot is a base layer. Mutating
/// operations take a cancellation token; cancelling before the metadata
/// transaction commits leaves no trace, cancelling after it has no effect.
pub trait Snapshotter {
    /// Create a writable active snapshot on top of `parent`.
    fn prepare(
        &self,
        cancel: &CancelToken,
        key: &str,
        parent: &str,
    ) -> Result<Vec<Mount>, SnapshotError>;

    /// Create a read-only active snapshot on top of `parent`.
    fn view(&self, cancel: &CancelToken, key: &str, parent: &str)
        -> Result<Vec<Mount>, SnapshotError>;

    /// Mounts of an existing active snapshot.
    fn mounts(&self, key: &str) -> Result<Vec<Mount>, SnapshotError>;

    /// Turn active snapshot `key` into committed snapshot `name`.
    fn commit(&self, cancel: &CancelToken, name: &str, key: &str) -> Result<(), SnapshotError>;

    /// Delete a snapshot that has no children.
    fn remove(&self, cancel: &CancelToken, key: &str) -> Result<(), SnapshotError>;

    fn stat(&self, key: &str) -> Result<Info, SnapshotError>;

    /// Visit every snapshot once. Stops at the first error the visitor returns.
    fn walk(
        &self,
        visitor: &mut dyn FnMut(&Info) -> Result<(), SnapshotError>,
    ) -> Result<(), SnapshotError>;
}
