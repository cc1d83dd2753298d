use crate::StoreError;
use crate::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
/// Number of lock files per namespace that keys hash onto.
pub const LOCK_STRIPES: u32 = 256;
const VERSION_FILE: &str = "version";

/// Directory layout of a Strata store.
///
/// ```text
/// <root>/store/version
/// <root>/store/.lock
/// <root>/store/metadata/<ns>/records/<blake3(key)>
/// <root>/store/metadata/<ns>/journal/<txid>.json
/// <root>/store/metadata/<ns>/locks/<stripe>.lock
/// <root>/snapshots/<id>/fs
/// <root>/snapshots/<id>/work
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    #[inline]
    pub fn metadata_dir(&self) -> PathBuf {
        self.store_dir().join("metadata")
    }

    #[inline]
    pub fn namespace_dir(&self, ns: &str) -> PathBuf {
        self.metadata_dir().join(ns)
    }

    #[inline]
    pub fn records_dir(&self, ns: &str) -> PathBuf {
        self.namespace_dir(ns).join("records")
    }

    #[inline]
    pub fn journal_dir(&self, ns: &str) -> PathBuf {
        self.namespace_dir(ns).join("journal")
    }

    #[inline]
    pub fn locks_dir(&self, ns: &str) -> PathBuf {
        self.namespace_dir(ns).join("locks")
    }

    #[inline]
    pub fn stripe_lock(&self, ns: &str, stripe: u32) -> PathBuf {
        self.locks_dir(ns).join(format!("{stripe:03}.lock"))
    }

    #[inline]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    #[inline]
    pub fn snapshot_path(&self, id: &str) -> PathBuf {
        self.snapshots_dir().join(id)
    }

    /// Content directory of a snapshot. For an active snapshot this is the
    /// writable upper layer; for a committed one it is a lower layer.
    #[inline]
    pub fn snapshot_fs(&self, id: &str) -> PathBuf {
        self.snapshot_path(id).join("fs")
    }

    /// Overlay scratch directory, only present for writable snapshots.
    #[inline]
    pub fn snapshot_work(&self, id: &str) -> PathBuf {
        self.snapshot_path(id).join("work")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.store_dir().join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.metadata_dir())?;
        fs::create_dir_all(self.snapshots_dir())?;

        let version_path = self.store_dir().join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let store_dir = self.store_dir();
            let mut tmp = NamedTempFile::new_in(&store_dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::from(e.error))?;
            crate::fsync_dir(&store_dir)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.store_dir().join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::new(
                ErrorKind::VersionMismatch,
                format!(
                    "store format version mismatch: expected {STORE_FORMAT_VERSION}, found {}",
                    ver.format_version
                ),
            ));
        }
        Ok(())
    }
}
