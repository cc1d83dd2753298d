use crate::lineage::SnapshotRecord;
use crate::snapshotter::Kind;
use crate::SnapshotError;

/// Operations whose legality depends on a record's kind and readonly flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Commit,
    Remove,
    Mounts,
    /// Using the record as the parent of a new snapshot.
    Parent,
}

pub fn validate_operation(record: &SnapshotRecord, op: Operation) -> Result<(), SnapshotError> {
    let key = &record.key;
    match (op, record.kind, record.readonly) {
        (Operation::Commit, Kind::Active, false)
        | (Operation::Remove, _, _)
        | (Operation::Mounts, Kind::Active, _)
        | (Operation::Parent, Kind::Committed, _) => Ok(()),
        (Operation::Commit, Kind::Active, true) => Err(SnapshotError::invalid_state(format!(
            "snapshot '{key}' is a view and cannot be committed"
        ))),
        (Operation::Commit, Kind::Committed, _) => Err(SnapshotError::invalid_state(format!(
            "snapshot '{key}' is already committed"
        ))),
        (Operation::Mounts, Kind::Committed, _) => Err(SnapshotError::not_found(format!(
            "active snapshot '{key}' not found"
        ))),
        (Operation::Parent, Kind::Active, _) => Err(SnapshotError::not_found(format!(
            "parent snapshot '{key}' is not committed"
        ))),
    }
}
