//! Namespaced key/value records with optimistic, multi-key transactions.
//!
//! Every record lives in its own file under `records/`, named by the blake3
//! hash of its key. A transaction buffers its writes, and on commit takes
//! exclusive stripe locks over everything it read or wrote, validates the
//! generations it observed, and hands the change set to the journal before
//! applying it.

use crate::journal::{next_txid, Journal, JournalEntry, JournalOp};
use crate::layout::{StoreLayout, LOCK_STRIPES};
use crate::types::NamespaceName;
use crate::{decode, encode, fsync_dir, stripe_of, ErrorKind, StoreError};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub fn validate_namespace(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.len() > 64 {
        return Err(StoreError::new(
            ErrorKind::InvalidArgument,
            "namespace name must be 1-64 characters",
        ));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(StoreError::new(
            ErrorKind::InvalidArgument,
            format!("namespace name '{name}' must match [a-zA-Z0-9_-]"),
        ));
    }
    Ok(())
}

/// On-disk form of one record.
#[derive(Debug, Serialize, Deserialize)]
struct RecordEnvelope {
    key: String,
    generation: String,
    value: String,
    checksum: String,
}

impl RecordEnvelope {
    fn compute_checksum(key: &str, generation: &str, value: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(key.as_bytes());
        hasher.update(b"\0");
        hasher.update(generation.as_bytes());
        hasher.update(b"\0");
        hasher.update(value.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    fn seal(key: &[u8], generation: &str, value: &[u8]) -> Self {
        let key = encode(key);
        let value = encode(value);
        let checksum = Self::compute_checksum(&key, generation, &value);
        Self {
            key,
            generation: generation.to_owned(),
            value,
            checksum,
        }
    }

    fn verify(&self) -> Result<(), StoreError> {
        let actual = Self::compute_checksum(&self.key, &self.generation, &self.value);
        if actual != self.checksum {
            return Err(StoreError::new(
                ErrorKind::Corrupt,
                format!(
                    "record checksum mismatch: expected {}, got {actual}",
                    self.checksum
                ),
            ));
        }
        Ok(())
    }
}

struct Record {
    generation: String,
    value: Vec<u8>,
}

#[derive(Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Held stripe locks. Released when dropped.
struct StripeGuard {
    files: Vec<File>,
}

impl Drop for StripeGuard {
    fn drop(&mut self) {
        for f in self.files.iter().rev() {
            let _ = f.unlock();
        }
    }
}

pub struct MetadataStore {
    layout: StoreLayout,
}

impl MetadataStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Open (creating if needed) a namespace and replay any journal entries
    /// left behind by a process that died mid-commit.
    pub fn open_namespace(&self, name: &str) -> Result<Namespace, StoreError> {
        validate_namespace(name)?;
        let ns = Namespace {
            layout: self.layout.clone(),
            name: NamespaceName::new(name),
            journal: Journal::new(&self.layout, name),
        };
        fs::create_dir_all(self.layout.records_dir(name))?;
        fs::create_dir_all(self.layout.locks_dir(name))?;
        ns.journal.initialize()?;
        ns.recover()?;
        Ok(ns)
    }

    pub fn namespaces(&self) -> Result<Vec<NamespaceName>, StoreError> {
        let dir = self.layout.metadata_dir();
        let read_dir = match fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_namespace(name).is_ok() {
                    names.push(NamespaceName::new(name));
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete an empty namespace.
    pub fn remove_namespace(&self, name: &str) -> Result<(), StoreError> {
        validate_namespace(name)?;
        let dir = self.layout.namespace_dir(name);
        if !dir.is_dir() {
            return Err(StoreError::not_found(&format!(
                "namespace '{name}' not found"
            )));
        }
        let ns = self.open_namespace(name)?;
        if !ns.is_empty()? {
            return Err(StoreError::not_empty(""));
        }

        let all: BTreeSet<u32> = (0..LOCK_STRIPES).collect();
        let _guard = ns.lock_stripes(&all, LockMode::Exclusive)?;
        // a commit may have landed between the check and the locks
        ns.replay_pending()?;
        if !ns.is_empty()? {
            return Err(StoreError::not_empty(""));
        }
        fs::remove_dir_all(&dir)?;
        fsync_dir(&self.layout.metadata_dir())?;
        info!("removed namespace {name}");
        Ok(())
    }
}

/// Handle to one namespace. Cheap to clone; holds no open files.
#[derive(Debug, Clone)]
pub struct Namespace {
    layout: StoreLayout,
    name: NamespaceName,
    journal: Journal,
}

impl Namespace {
    pub fn name(&self) -> &NamespaceName {
        &self.name
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            ns: self,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Point read outside any transaction.
    ///
    /// Takes a shared lock on the key's stripe so it never sees a
    /// transaction that is halfway through applying.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        let stripes = BTreeSet::from([stripe_of(key)]);
        let _guard = self.lock_settled(&stripes)?;
        match self.read_record(key)? {
            Some(rec) => Ok(rec.value),
            None => Err(StoreError::not_found("")),
        }
    }

    /// Every record in the namespace, sorted by key. Corrupt records are
    /// logged and skipped.
    ///
    /// Holds a shared lock on every stripe for the whole scan, so the result
    /// is a single consistent cut between commits.
    pub fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let all: BTreeSet<u32> = (0..LOCK_STRIPES).collect();
        let _guard = self.lock_settled(&all)?;
        let dir = self.layout.records_dir(&self.name);
        let mut out = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            match read_envelope(&entry.path()) {
                Ok(Some((key, rec))) => out.push((key, rec.value)),
                Ok(None) => {}
                Err(e) => warn!("skipping corrupt record '{name}' in {}: {e}", self.name),
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        let dir = self.layout.records_dir(&self.name);
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_name().to_string_lossy().starts_with('.') {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Replay every pending journal entry under its own stripe locks.
    /// Returns the number of entries replayed.
    pub fn recover(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        for entry in self.journal.pending()? {
            if self.replay_entry(&entry)? {
                count += 1;
            }
        }
        if count > 0 {
            info!("journal recovery complete: {count} entries replayed");
        }
        Ok(count)
    }

    /// Replay one entry under exclusive locks on its stripes. Returns false
    /// if someone else replayed it while we waited for the locks.
    fn replay_entry(&self, entry: &JournalEntry) -> Result<bool, StoreError> {
        let stripes = entry.stripes()?;
        let _guard = self.lock_stripes(&stripes, LockMode::Exclusive)?;
        if !self.journal.contains(&entry.txid) {
            return Ok(false);
        }
        info!(
            "journal recovery: replaying {} in {} ({} ops)",
            entry.txid,
            self.name,
            entry.ops.len()
        );
        self.apply(entry)?;
        self.journal.remove(&entry.txid)?;
        Ok(true)
    }

    /// Shared locks on `stripes`, taken only once no journal entry touching
    /// them is pending.
    ///
    /// A live committer keeps its stripes exclusive until its entry is gone,
    /// so an entry still pending once we hold the shared locks was left by a
    /// committer that failed or died partway through applying it. It is
    /// replayed before anything is read.
    fn lock_settled(&self, stripes: &BTreeSet<u32>) -> Result<StripeGuard, StoreError> {
        loop {
            let guard = self.lock_stripes(stripes, LockMode::Shared)?;
            let mut stale = Vec::new();
            for entry in self.journal.pending()? {
                if !entry.stripes()?.is_disjoint(stripes) {
                    stale.push(entry);
                }
            }
            if stale.is_empty() {
                return Ok(guard);
            }
            drop(guard);
            for entry in &stale {
                self.replay_entry(entry)?;
            }
        }
    }

    /// Replay pending entries assuming the caller already holds every stripe.
    fn replay_pending(&self) -> Result<(), StoreError> {
        for entry in self.journal.pending()? {
            self.apply(&entry)?;
            self.journal.remove(&entry.txid)?;
        }
        Ok(())
    }

    fn record_path(&self, key: &[u8]) -> PathBuf {
        self.layout
            .records_dir(&self.name)
            .join(blake3::hash(key).to_hex().as_str())
    }

    fn read_record(&self, key: &[u8]) -> Result<Option<Record>, StoreError> {
        match read_envelope(&self.record_path(key))? {
            Some((stored_key, rec)) if stored_key == key => Ok(Some(rec)),
            Some(_) => Err(StoreError::new(
                ErrorKind::Corrupt,
                format!(
                    "record for key '{}' holds a different key",
                    String::from_utf8_lossy(key)
                ),
            )),
            None => Ok(None),
        }
    }

    fn write_record(&self, key: &[u8], generation: &str, value: &[u8]) -> Result<(), StoreError> {
        let envelope = RecordEnvelope::seal(key, generation, value);
        let content = serde_json::to_string_pretty(&envelope)?;
        let dir = self.layout.records_dir(&self.name);
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.record_path(key))
            .map_err(|e| StoreError::from(e.error))?;
        Ok(())
    }

    fn delete_record(&self, key: &[u8]) -> Result<(), StoreError> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply an entry to the record files. Puts go before deletes.
    /// Idempotent, so a half-applied entry can be applied again.
    fn apply(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        for op in entry.ops.iter().filter(|op| op.is_put()) {
            if let JournalOp::Put { key, value } = op {
                self.write_record(&decode(key)?, &entry.txid, &decode(value)?)?;
            }
        }
        for op in entry.ops.iter().filter(|op| !op.is_put()) {
            self.delete_record(&op.key()?)?;
        }
        fsync_dir(&self.layout.records_dir(&self.name))?;
        Ok(())
    }

    /// Block until every stripe in `stripes` is locked. Stripes are taken in
    /// ascending order so concurrent committers cannot deadlock.
    fn lock_stripes(
        &self,
        stripes: &BTreeSet<u32>,
        mode: LockMode,
    ) -> Result<StripeGuard, StoreError> {
        let mut guard = StripeGuard {
            files: Vec::with_capacity(stripes.len()),
        };
        for &stripe in stripes {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(self.layout.stripe_lock(&self.name, stripe))?;
            match mode {
                LockMode::Shared => file.lock_shared()?,
                LockMode::Exclusive => file.lock_exclusive()?,
            }
            guard.files.push(file);
        }
        Ok(guard)
    }
}

fn read_envelope(path: &Path) -> Result<Option<(Vec<u8>, Record)>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let envelope: RecordEnvelope = serde_json::from_str(&content)?;
    envelope.verify()?;
    let key = decode(&envelope.key)?;
    let value = decode(&envelope.value)?;
    Ok(Some((
        key,
        Record {
            generation: envelope.generation,
            value,
        },
    )))
}

/// An optimistic transaction over one namespace.
///
/// Reads go straight to disk and remember the generation they saw; writes
/// are buffered until [`Transaction::commit`]. Dropping the transaction
/// without committing discards it.
pub struct Transaction<'ns> {
    ns: &'ns Namespace,
    /// Generation first observed per key read. `None` means absent.
    reads: BTreeMap<Vec<u8>, Option<String>>,
    /// Buffered writes. `None` is a delete.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Transaction<'_> {
    pub fn namespace(&self) -> &Namespace {
        self.ns
    }

    fn observe(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        let rec = self.ns.read_record(key)?;
        self.reads
            .entry(key.to_vec())
            .or_insert_with(|| rec.as_ref().map(|r| r.generation.clone()));
        Ok(rec.map(|r| r.value))
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.observe(key)?
            .ok_or_else(|| StoreError::not_found(""))
    }

    pub fn exists(&mut self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.observe(key)?.is_some())
    }

    /// Insert a record that must not exist yet.
    pub fn create(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        if self.exists(key)? {
            return Err(StoreError::exists(""));
        }
        self.writes.insert(key.to_vec(), Some(value));
        Ok(())
    }

    pub fn put(&mut self, key: &[u8], value: Vec<u8>) {
        self.writes.insert(key.to_vec(), Some(value));
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        if !self.exists(key)? {
            return Err(StoreError::not_found(""));
        }
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }

    /// Commit the transaction.
    ///
    /// Fails with `Conflict` if any key read has changed since, and with
    /// `Cancelled` if `should_stop` reports true once the locks are held.
    /// In both cases nothing is written.
    ///
    /// Once the journal entry is durable the transaction has committed and
    /// this returns `Ok`. If applying it fails twice the entry stays pending
    /// and readers replay it before they look at any record it touches.
    pub fn commit(self, should_stop: impl Fn() -> bool) -> Result<(), StoreError> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let ns = self.ns;

        let mut stripes: BTreeSet<u32> = self
            .reads
            .keys()
            .chain(self.writes.keys())
            .map(|k| stripe_of(k))
            .collect();

        loop {
            let guard = ns.lock_stripes(&stripes, LockMode::Exclusive)?;

            // Any entry touching a stripe we hold exclusively belongs to a
            // committer that died before removing it.
            let mut widen = BTreeSet::new();
            for entry in ns.journal.pending()? {
                let entry_stripes = entry.stripes()?;
                if entry_stripes.is_disjoint(&stripes) {
                    continue;
                }
                if entry_stripes.is_subset(&stripes) {
                    info!("replaying dead journal entry {} in {}", entry.txid, ns.name);
                    ns.apply(&entry)?;
                    ns.journal.remove(&entry.txid)?;
                } else {
                    widen.extend(entry_stripes);
                }
            }
            if !widen.is_empty() {
                drop(guard);
                stripes.extend(widen);
                continue;
            }

            for (key, observed) in &self.reads {
                let current = ns.read_record(key)?.map(|r| r.generation);
                if current != *observed {
                    debug!(
                        "conflict on key '{}' in {}",
                        String::from_utf8_lossy(key),
                        ns.name
                    );
                    return Err(StoreError::conflict(format!(
                        "metadata: key '{}' changed during transaction",
                        String::from_utf8_lossy(key)
                    )));
                }
            }

            if should_stop() {
                return Err(StoreError::new(
                    ErrorKind::Cancelled,
                    "metadata: transaction cancelled",
                ));
            }

            let ops = self
                .writes
                .iter()
                .map(|(key, value)| match value {
                    Some(v) => JournalOp::put(key, v),
                    None => JournalOp::delete(key),
                })
                .collect();
            let entry = JournalEntry::new(next_txid(), &ns.name, ops);
            ns.journal.write(&entry)?;
            if let Err(e) = ns.apply(&entry).or_else(|first| {
                warn!("applying {} in {} failed, retrying: {first}", entry.txid, ns.name);
                ns.apply(&entry)
            }) {
                warn!(
                    "{} in {} left pending for replay: {e}",
                    entry.txid, ns.name
                );
            } else if let Err(e) = ns.journal.remove(&entry.txid) {
                warn!("failed to remove journal entry {}: {e}", entry.txid);
            }
            drop(guard);

            debug!(
                "committed {} in {} ({} writes)",
                entry.txid,
                ns.name,
                entry.ops.len()
            );
            return Ok(());
        }
    }
}
