use crate::SnapshotError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Store-wide advisory lock.
///
/// Snapshot operations hold it shared while they own a storage directory
/// that no record references yet; cleanup holds it exclusive so it never
/// deletes such a directory.
pub struct StoreLock {
    lock_file: File,
}

fn open_lock_file(lock_path: &Path) -> Result<File, SnapshotError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

impl StoreLock {
    pub fn shared(lock_path: &Path) -> Result<Self, SnapshotError> {
        let file = open_lock_file(lock_path)?;
        file.lock_shared()?;
        Ok(Self { lock_file: file })
    }

    pub fn exclusive(lock_path: &Path) -> Result<Self, SnapshotError> {
        let file = open_lock_file(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { lock_file: file })
    }

    pub fn try_exclusive(lock_path: &Path) -> Result<Option<Self>, SnapshotError> {
        let file = open_lock_file(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

/// Cooperative cancellation flag shared between a caller and an operation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), SnapshotError> {
        if self.is_cancelled() {
            Err(SnapshotError::cancelled())
        } else {
            Ok(())
        }
    }
}

static SHUTDOWN: OnceLock<CancelToken> = OnceLock::new();

/// Token tripped by the process signal handler.
pub fn shutdown_token() -> CancelToken {
    SHUTDOWN.get_or_init(CancelToken::new).clone()
}

/// Cancel the shutdown token on the first Ctrl-C; exit on the second.
pub fn install_signal_handler() {
    let token = shutdown_token();
    let _ = ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(1);
        }
        token.cancel();
        eprintln!("\nshutdown requested, finishing current operation...");
    });
}

pub fn shutdown_requested() -> bool {
    shutdown_token().is_cancelled()
}
