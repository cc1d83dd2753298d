//! Per-namespace redo journal.
//!
//! A transaction writes its full set of record changes here before touching
//! any record file. Once the entry is durable the transaction is committed:
//! if the process dies while applying it, the next committer that locks the
//! affected stripes (or the next `open_namespace`) replays the entry.

use crate::layout::StoreLayout;
use crate::{decode, encode, stripe_of, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

static TXID_SEQ: AtomicU64 = AtomicU64::new(0);

/// Allocate a transaction id. It doubles as the generation stamped on every
/// record the transaction writes, so it only has to be unique, not ordered.
pub fn next_txid() -> String {
    let now = chrono::Utc::now();
    let seq = TXID_SEQ.fetch_add(1, Ordering::Relaxed);
    let nanos = now.timestamp_nanos_opt().unwrap_or_default();
    let seed = format!("{}:{seq}:{nanos}", std::process::id());
    format!(
        "{}-{}",
        now.format("%Y%m%d%H%M%S%9f"),
        &blake3::hash(seed.as_bytes()).to_hex()[..12]
    )
}

/// One record change. Keys and values are base64 on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum JournalOp {
    Put { key: String, value: String },
    Delete { key: String },
}

impl JournalOp {
    pub fn put(key: &[u8], value: &[u8]) -> Self {
        JournalOp::Put {
            key: encode(key),
            value: encode(value),
        }
    }

    pub fn delete(key: &[u8]) -> Self {
        JournalOp::Delete { key: encode(key) }
    }

    pub fn key(&self) -> Result<Vec<u8>, StoreError> {
        match self {
            JournalOp::Put { key, .. } | JournalOp::Delete { key } => decode(key),
        }
    }

    pub fn is_put(&self) -> bool {
        matches!(self, JournalOp::Put { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub txid: String,
    pub namespace: String,
    pub timestamp: String,
    pub ops: Vec<JournalOp>,
}

impl JournalEntry {
    pub fn new(txid: String, namespace: &str, ops: Vec<JournalOp>) -> Self {
        Self {
            txid,
            namespace: namespace.to_owned(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            ops,
        }
    }

    /// Lock stripes covering every key the entry touches.
    pub fn stripes(&self) -> Result<BTreeSet<u32>, StoreError> {
        let mut out = BTreeSet::new();
        for op in &self.ops {
            out.insert(stripe_of(&op.key()?));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(layout: &StoreLayout, namespace: &str) -> Self {
        Self {
            dir: layout.journal_dir(namespace),
        }
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn entry_path(&self, txid: &str) -> PathBuf {
        self.dir.join(format!("{txid}.json"))
    }

    pub fn contains(&self, txid: &str) -> bool {
        self.entry_path(txid).exists()
    }

    /// Durably write an entry. Returns once the entry survives a crash.
    pub fn write(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(entry)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.entry_path(&entry.txid))
            .map_err(|e| StoreError::from(e.error))?;
        crate::fsync_dir(&self.dir)?;
        debug!("journal write: {} ({} ops)", entry.txid, entry.ops.len());
        Ok(())
    }

    pub fn remove(&self, txid: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.entry_path(txid)) {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        crate::fsync_dir(&self.dir)?;
        debug!("journal remove: {txid}");
        Ok(())
    }

    /// Entries currently on disk, sorted by txid.
    ///
    /// An entry removed while the directory is being read is skipped. An
    /// entry that cannot be parsed is logged and discarded: entries are
    /// written through a rename, so a torn one never held a committed
    /// transaction.
    pub fn pending(&self) -> Result<Vec<JournalEntry>, StoreError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let path = dir_entry?.path();
            let is_entry = path.extension().is_some_and(|e| e == "json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if !is_entry {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_str::<JournalEntry>(&content) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!("discarding corrupt journal entry {}: {e}", path.display());
                    let _ = fs::remove_file(&path);
                }
            }
        }
        entries.sort_by(|a, b| a.txid.cmp(&b.txid));
        Ok(entries)
    }
}
