//! The lineage table: snapshot records and the parent/child invariants.
//!
//! Every change runs inside one store transaction, so a record and the
//! child count of its parent are always written together.

use crate::lifecycle::{validate_operation, Operation};
use crate::snapshotter::{Info, Kind};
use crate::SnapshotError;
use serde::{Deserialize, Serialize};
use strata_store::{ErrorKind as StoreErrorKind, SnapshotId, SnapshotKey, Transaction};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub key: SnapshotKey,
    /// Storage area under `snapshots/`. Kept across commit.
    pub id: SnapshotId,
    pub kind: Kind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<SnapshotKey>,
    /// Active and committed records whose parent is this one.
    pub children: u32,
    pub readonly: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl SnapshotRecord {
    pub fn info(&self) -> Info {
        Info {
            name: self.key.clone(),
            parent: self.parent.clone(),
            kind: self.kind,
            readonly: self.readonly,
            children: self.children,
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn require_key(key: &str, what: &str) -> Result<(), SnapshotError> {
    if key.is_empty() {
        return Err(SnapshotError::invalid_argument(format!(
            "{what} must not be empty"
        )));
    }
    Ok(())
}

/// Lineage operations over one open transaction.
pub struct Lineage<'ns> {
    tx: Transaction<'ns>,
}

impl<'ns> Lineage<'ns> {
    pub fn new(tx: Transaction<'ns>) -> Self {
        Self { tx }
    }

    pub fn find(&mut self, key: &str) -> Result<Option<SnapshotRecord>, SnapshotError> {
        match self.tx.get(key.as_bytes()) {
            Ok(bytes) => Ok(Some(SnapshotRecord::from_bytes(&bytes)?)),
            Err(e) if e.kind() == StoreErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&mut self, key: &str) -> Result<SnapshotRecord, SnapshotError> {
        self.find(key)?
            .ok_or_else(|| SnapshotError::not_found(format!("snapshot '{key}' not found")))
    }

    fn put(&mut self, record: &SnapshotRecord) -> Result<(), SnapshotError> {
        self.tx.put(record.key.as_bytes(), record.to_bytes()?);
        Ok(())
    }

    /// Insert a new active record under `key`, counting it as a child of
    /// `parent`. The parent must exist and be committed.
    pub fn create(
        &mut self,
        key: &str,
        id: SnapshotId,
        parent: Option<&str>,
        readonly: bool,
    ) -> Result<SnapshotRecord, SnapshotError> {
        require_key(key, "snapshot key")?;
        if self.find(key)?.is_some() {
            return Err(SnapshotError::already_exists(format!(
                "snapshot '{key}' already exists"
            )));
        }

        let now = chrono::Utc::now().to_rfc3339();
        if let Some(parent_key) = parent {
            let mut parent_rec = self.find(parent_key)?.ok_or_else(|| {
                SnapshotError::not_found(format!("parent snapshot '{parent_key}' not found"))
            })?;
            validate_operation(&parent_rec, Operation::Parent)?;
            parent_rec.children += 1;
            parent_rec.updated_at.clone_from(&now);
            self.put(&parent_rec)?;
        }

        let record = SnapshotRecord {
            key: SnapshotKey::new(key),
            id,
            kind: Kind::Active,
            parent: parent.map(SnapshotKey::new),
            children: 0,
            readonly,
            created_at: now.clone(),
            updated_at: now,
        };
        self.tx.create(key.as_bytes(), record.to_bytes()?)?;
        Ok(record)
    }

    /// Replace active record `key` with committed record `name`.
    ///
    /// The storage id and parent carry over. The parent's child count is
    /// untouched: it already counted the active record.
    pub fn commit(&mut self, name: &str, key: &str) -> Result<SnapshotRecord, SnapshotError> {
        require_key(name, "commit name")?;
        let active = self.get(key)?;
        validate_operation(&active, Operation::Commit)?;
        if self.find(name)?.is_some() {
            return Err(SnapshotError::already_exists(format!(
                "snapshot '{name}' already exists"
            )));
        }

        let now = chrono::Utc::now().to_rfc3339();
        let committed = SnapshotRecord {
            key: SnapshotKey::new(name),
            id: active.id,
            kind: Kind::Committed,
            parent: active.parent,
            children: 0,
            readonly: false,
            created_at: now.clone(),
            updated_at: now,
        };
        self.tx.delete(key.as_bytes())?;
        self.tx.create(name.as_bytes(), committed.to_bytes()?)?;
        Ok(committed)
    }

    /// Delete a childless record and release its slot in the parent's count.
    pub fn remove(&mut self, key: &str) -> Result<SnapshotRecord, SnapshotError> {
        let record = self.get(key)?;
        validate_operation(&record, Operation::Remove)?;
        if record.children > 0 {
            return Err(SnapshotError::not_empty(format!(
                "snapshot '{key}' has {} children",
                record.children
            )));
        }

        self.tx.delete(key.as_bytes())?;
        if let Some(parent_key) = &record.parent {
            match self.find(parent_key)? {
                Some(mut parent) => {
                    parent.children = parent.children.saturating_sub(1);
                    parent.updated_at = chrono::Utc::now().to_rfc3339();
                    self.put(&parent)?;
                }
                None => warn!("snapshot '{key}' references missing parent '{parent_key}'"),
            }
        }
        Ok(record)
    }

    /// Commit the underlying transaction.
    pub fn finish(self, should_stop: impl Fn() -> bool) -> Result<(), SnapshotError> {
        Ok(self.tx.commit(should_stop)?)
    }
}
