use crate::concurrency::{CancelToken, StoreLock};
use crate::config::EngineConfig;
use crate::lifecycle::{validate_operation, Operation};
use crate::lineage::{Lineage, SnapshotRecord};
use crate::mounts::{build_mounts, overlay, Mount};
use crate::snapshotter::{Info, Snapshotter};
use crate::verify::{lineage_stats, verify_lineage, LineageReport, LineageStats};
use crate::{ErrorKind, SnapshotError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use strata_store::{
    ErrorKind as StoreErrorKind, MetadataStore, Namespace, NamespaceName, SnapshotId,
    SnapshotKey, StoreLayout,
};
use tracing::{debug, info, warn};

static ID_SEQ: AtomicU64 = AtomicU64::new(0);

/// Operation counters. Read-only from the outside.
#[derive(Debug, Default)]
pub struct EngineCounters {
    prepared: AtomicU64,
    viewed: AtomicU64,
    committed: AtomicU64,
    removed: AtomicU64,
    conflicts_retried: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub prepared: u64,
    pub viewed: u64,
    pub committed: u64,
    pub removed: u64,
    pub conflicts_retried: u64,
    /// Operations abandoned after conflicting on every attempt.
    pub failed: u64,
}

impl EngineCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            prepared: self.prepared.load(Ordering::Relaxed),
            viewed: self.viewed.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            conflicts_retried: self.conflicts_retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct CleanupReport {
    /// Storage ids whose directories were deleted.
    pub removed: Vec<String>,
    pub kept: usize,
}

/// Snapshot engine bound to one namespace of a store.
///
/// Lineage lives in the metadata store; snapshot content lives under
/// `snapshots/<id>`. The engine never looks inside a snapshot's content.
pub struct Engine {
    config: EngineConfig,
    layout: StoreLayout,
    meta_store: MetadataStore,
    ns: Namespace,
    counters: EngineCounters,
}

impl Engine {
    /// Open the store at `config.root`, creating it if needed, and bind to
    /// `config.namespace`. Pending journal entries are replayed first.
    pub fn open(config: EngineConfig) -> Result<Self, SnapshotError> {
        let layout = StoreLayout::new(&config.root);
        layout.initialize()?;
        let meta_store = MetadataStore::new(layout.clone());
        let ns = meta_store.open_namespace(&config.namespace)?;
        info!(
            "opened namespace {} in {}",
            config.namespace,
            config.root.display()
        );
        Ok(Self {
            config,
            layout,
            meta_store,
            ns,
            counters: EngineCounters::default(),
        })
    }

    pub fn close(self) {
        debug!(
            "closing namespace {} ({:?})",
            self.ns.name(),
            self.counters.snapshot()
        );
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn namespace(&self) -> &NamespaceName {
        self.ns.name()
    }

    pub fn counters(&self) -> &EngineCounters {
        &self.counters
    }

    pub fn namespaces(&self) -> Result<Vec<NamespaceName>, SnapshotError> {
        Ok(self.meta_store.namespaces()?)
    }

    pub fn remove_namespace(&self, name: &str) -> Result<(), SnapshotError> {
        if name == self.ns.name().as_str() {
            return Err(SnapshotError::invalid_argument(format!(
                "namespace '{name}' is in use by this engine"
            )));
        }
        Ok(self.meta_store.remove_namespace(name)?)
    }

    fn allocate_id(&self, key: &str) -> SnapshotId {
        let seq = ID_SEQ.fetch_add(1, Ordering::Relaxed);
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        let seed = format!(
            "{}\0{key}\0{nanos}\0{}\0{seq}",
            self.ns.name(),
            std::process::id()
        );
        SnapshotId::new(&blake3::hash(seed.as_bytes()).to_hex()[..32])
    }

    fn create_storage(&self, id: &SnapshotId, writable: bool) -> Result<(), SnapshotError> {
        fs::create_dir_all(self.layout.snapshot_fs(id))?;
        if writable {
            fs::create_dir_all(self.layout.snapshot_work(id))?;
        }
        Ok(())
    }

    fn discard_storage(&self, id: &SnapshotId) {
        let path = self.layout.snapshot_path(id);
        if let Err(e) = fs::remove_dir_all(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove snapshot storage {}: {e}", path.display());
            }
        }
    }

    /// Run one transactional attempt, retrying when a concurrent transaction
    /// invalidated what it read. Every attempt re-reads its preconditions.
    fn with_retry<T>(
        &self,
        op: &str,
        mut attempt: impl FnMut() -> Result<T, SnapshotError>,
    ) -> Result<T, SnapshotError> {
        let max = self.config.max_attempts.max(1);
        let mut tries = 1;
        loop {
            match attempt() {
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    if tries >= max {
                        EngineCounters::bump(&self.counters.failed);
                        return Err(SnapshotError::with_source(
                            ErrorKind::Failed,
                            format!("{op} failed: concurrent update conflicted {tries} times"),
                            e,
                        ));
                    }
                    EngineCounters::bump(&self.counters.conflicts_retried);
                    debug!("{op}: conflict on attempt {tries}, retrying");
                    tries += 1;
                }
                other => return other,
            }
        }
    }

    fn load(&self, key: &str) -> Result<SnapshotRecord, SnapshotError> {
        match self.ns.get(key.as_bytes()) {
            Ok(bytes) => SnapshotRecord::from_bytes(&bytes),
            Err(e) if e.kind() == StoreErrorKind::NotFound => Err(SnapshotError::with_source(
                ErrorKind::NotFound,
                format!("snapshot '{key}' not found"),
                e,
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Content directories of `parent` and its ancestors, nearest first.
    fn chain_dirs(&self, parent: Option<&SnapshotKey>) -> Result<Vec<PathBuf>, SnapshotError> {
        let mut dirs = Vec::new();
        let mut seen = HashSet::new();
        let mut next = parent.cloned();
        while let Some(key) = next {
            if !seen.insert(key.clone()) {
                return Err(SnapshotError::new(
                    ErrorKind::Storage,
                    format!("lineage cycle through snapshot '{key}'"),
                ));
            }
            let rec = self.load(&key)?;
            dirs.push(self.layout.snapshot_fs(&rec.id));
            next = rec.parent;
        }
        Ok(dirs)
    }

    fn mounts_for(&self, record: &SnapshotRecord) -> Result<Vec<Mount>, SnapshotError> {
        let chain = self.chain_dirs(record.parent.as_ref())?;
        let top = (!record.readonly).then(|| self.layout.snapshot_fs(&record.id));
        Ok(build_mounts(&chain, top.as_deref()))
    }

    fn create_snapshot(
        &self,
        cancel: &CancelToken,
        key: &str,
        parent: &str,
        readonly: bool,
    ) -> Result<Vec<Mount>, SnapshotError> {
        let op = if readonly { "view" } else { "prepare" };
        cancel.check()?;
        if key.is_empty() {
            return Err(SnapshotError::invalid_argument("snapshot key must not be empty"));
        }
        let parent = (!parent.is_empty()).then_some(parent);

        let _lock = StoreLock::shared(&self.layout.lock_file())?;
        let id = self.allocate_id(key);
        self.create_storage(&id, !readonly)?;

        // The ancestor chain is read before the commit. The parent is in the
        // read set, and a committed parent pins its own ancestors, so the
        // chain is still valid once the transaction lands.
        let created = self.with_retry(op, || {
            let mut lineage = Lineage::new(self.ns.begin());
            let record = lineage.create(key, id.clone(), parent, readonly)?;
            let chain = self.chain_dirs(record.parent.as_ref())?;
            lineage.finish(|| cancel.is_cancelled())?;
            Ok((record, chain))
        });
        let (record, chain) = match created {
            Ok(r) => r,
            Err(e) => {
                self.discard_storage(&id);
                return Err(e);
            }
        };

        if readonly {
            EngineCounters::bump(&self.counters.viewed);
        } else {
            EngineCounters::bump(&self.counters.prepared);
        }
        info!(
            "{op} {key} (parent: {}, id {id})",
            parent.unwrap_or("<none>")
        );
        let top = (!readonly).then(|| self.layout.snapshot_fs(&record.id));
        Ok(build_mounts(&chain, top.as_deref()))
    }

    /// The mounts of active snapshot `key` collapsed into a single overlay.
    pub fn overlay(&self, key: &str) -> Result<Mount, SnapshotError> {
        let record = self.load(key)?;
        validate_operation(&record, Operation::Mounts)?;
        let mounts = self.mounts_for(&record)?;
        overlay(&mounts, &self.layout.snapshot_work(&record.id))
    }

    /// Every record in the namespace, sorted by key.
    pub fn records(&self) -> Result<Vec<SnapshotRecord>, SnapshotError> {
        let mut out = Vec::new();
        for (key, bytes) in self.ns.scan()? {
            match SnapshotRecord::from_bytes(&bytes) {
                Ok(rec) => out.push(rec),
                Err(e) => warn!(
                    "skipping undecodable snapshot record '{}': {e}",
                    String::from_utf8_lossy(&key)
                ),
            }
        }
        Ok(out)
    }

    /// Check the namespace's lineage invariants.
    ///
    /// Runs under the exclusive store lock. Storage directories are created
    /// before and deleted after the record transaction, so they only match
    /// the records while no operation is in flight.
    pub fn verify(&self) -> Result<LineageReport, SnapshotError> {
        let _lock = StoreLock::exclusive(&self.layout.lock_file())?;
        let records = self.records()?;
        Ok(verify_lineage(&records, &self.layout))
    }

    pub fn lineage_stats(&self) -> Result<LineageStats, SnapshotError> {
        Ok(lineage_stats(&self.records()?))
    }

    /// Delete snapshot directories that no record in any namespace uses.
    ///
    /// Fails with `Failed` while another operation holds the store lock.
    pub fn cleanup(&self) -> Result<CleanupReport, SnapshotError> {
        let Some(_lock) = StoreLock::try_exclusive(&self.layout.lock_file())? else {
            return Err(SnapshotError::new(
                ErrorKind::Failed,
                "store is busy; retry cleanup when no operation is running",
            ));
        };

        let mut live: HashSet<String> = HashSet::new();
        for name in self.meta_store.namespaces()? {
            let ns = self.meta_store.open_namespace(&name)?;
            for (_, bytes) in ns.scan()? {
                let rec = SnapshotRecord::from_bytes(&bytes)?;
                live.insert(rec.id.into_inner());
            }
        }

        let mut report = CleanupReport::default();
        let dir = self.layout.snapshots_dir();
        if !dir.exists() {
            return Ok(report);
        }
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if live.contains(&name) {
                report.kept += 1;
                continue;
            }
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            debug!("cleanup: removed {}", path.display());
            report.removed.push(name);
        }
        report.removed.sort();
        if !report.removed.is_empty() {
            info!("cleanup removed {} snapshot directories", report.removed.len());
        }
        Ok(report)
    }
}

impl Snapshotter for Engine {
    fn prepare(
        &self,
        cancel: &CancelToken,
        key: &str,
        parent: &str,
    ) -> Result<Vec<Mount>, SnapshotError> {
        self.create_snapshot(cancel, key, parent, false)
    }

    fn view(
        &self,
        cancel: &CancelToken,
        key: &str,
        parent: &str,
    ) -> Result<Vec<Mount>, SnapshotError> {
        self.create_snapshot(cancel, key, parent, true)
    }

    fn mounts(&self, key: &str) -> Result<Vec<Mount>, SnapshotError> {
        let record = self.load(key)?;
        validate_operation(&record, Operation::Mounts)?;
        self.mounts_for(&record)
    }

    fn commit(&self, cancel: &CancelToken, name: &str, key: &str) -> Result<(), SnapshotError> {
        cancel.check()?;
        let _lock = StoreLock::shared(&self.layout.lock_file())?;
        let committed = self.with_retry("commit", || {
            let mut lineage = Lineage::new(self.ns.begin());
            let record = lineage.commit(name, key)?;
            lineage.finish(|| cancel.is_cancelled())?;
            Ok(record)
        })?;
        EngineCounters::bump(&self.counters.committed);
        info!("committed {key} as {name} (id {})", committed.id);
        Ok(())
    }

    fn remove(&self, cancel: &CancelToken, key: &str) -> Result<(), SnapshotError> {
        cancel.check()?;
        let _lock = StoreLock::shared(&self.layout.lock_file())?;
        let removed = self.with_retry("remove", || {
            let mut lineage = Lineage::new(self.ns.begin());
            let record = lineage.remove(key)?;
            lineage.finish(|| cancel.is_cancelled())?;
            Ok(record)
        })?;
        self.discard_storage(&removed.id);
        EngineCounters::bump(&self.counters.removed);
        info!("removed {key} (id {})", removed.id);
        Ok(())
    }

    fn stat(&self, key: &str) -> Result<Info, SnapshotError> {
        Ok(self.load(key)?.info())
    }

    fn walk(
        &self,
        visitor: &mut dyn FnMut(&Info) -> Result<(), SnapshotError>,
    ) -> Result<(), SnapshotError> {
        for record in self.records()? {
            visitor(&record.info())?;
        }
        Ok(())
    }
}
