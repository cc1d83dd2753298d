use crate::SnapshotError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
const NAMESPACE_ENV: &str = "STRATA_NAMESPACE";

/// Engine settings, usually read from `strata.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub root: PathBuf,
    pub namespace: String,
    /// Total attempts for a transaction that hits a conflict.
    pub max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            namespace: DEFAULT_NAMESPACE.to_owned(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

fn default_root() -> PathBuf {
    std::env::var_os("HOME").map_or_else(
        || PathBuf::from("/var/lib/strata"),
        |home| PathBuf::from(home).join(".local/share/strata"),
    )
}

impl EngineConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, SnapshotError> {
        toml::from_str(content).map_err(|e| {
            SnapshotError::invalid_argument(format!("invalid engine config: {e}"))
        })
    }

    /// Apply `STRATA_NAMESPACE` if set and non-empty.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(ns) = std::env::var(NAMESPACE_ENV) {
            if !ns.is_empty() {
                self.namespace = ns;
            }
        }
        self
    }
}
