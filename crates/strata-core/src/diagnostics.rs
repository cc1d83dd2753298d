//! Process diagnostics: version, memory, a bucketed thread dump, and the
//! engine's counters. Informational only; collecting never touches lineage.

use crate::engine::{CounterSnapshot, Engine};
use crate::verify::LineageStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Memory figures in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemStats {
    pub allocated: u64,
    pub total_allocated: u64,
    pub system_bytes: u64,
    pub heap_allocated: u64,
    pub heap_system_bytes: u64,
    pub stack_in_use: u64,
    pub stack_system_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugInfo {
    pub version: String,
    pub commit: String,
    pub stack: String,
    pub memory: MemStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counters: Option<CounterSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage: Option<LineageStats>,
}

pub trait Diagnostics: Send + Sync {
    fn collect(&self) -> DebugInfo;
}

/// Diagnostics read from procfs. Hosts without `/proc` report zeros and an
/// empty dump.
#[derive(Default)]
pub struct ProcessDiagnostics {
    engine: Option<Arc<Engine>>,
}

impl ProcessDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(engine: Arc<Engine>) -> Self {
        Self {
            engine: Some(engine),
        }
    }
}

impl Diagnostics for ProcessDiagnostics {
    fn collect(&self) -> DebugInfo {
        let memory = fs::read_to_string("/proc/self/status")
            .map(|s| parse_status(&s))
            .unwrap_or_default();
        let stack = thread_dump(Path::new("/proc/self/task"));

        let (counters, lineage) = match &self.engine {
            Some(engine) => {
                let lineage = match engine.lineage_stats() {
                    Ok(stats) => Some(stats),
                    Err(e) => {
                        warn!("lineage stats unavailable: {e}");
                        None
                    }
                };
                (Some(engine.counters().snapshot()), lineage)
            }
            None => (None, None),
        };

        DebugInfo {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            commit: option_env!("STRATA_GIT_COMMIT")
                .unwrap_or("unknown")
                .to_owned(),
            stack,
            memory,
            counters,
            lineage,
        }
    }
}

fn kib_field(line: &str, name: &str) -> Option<u64> {
    let rest = line.strip_prefix(name)?.strip_prefix(':')?;
    let kib: u64 = rest.split_whitespace().next()?.parse().ok()?;
    Some(kib * 1024)
}

/// Map `/proc/self/status` onto [`MemStats`].
pub fn parse_status(status: &str) -> MemStats {
    let mut mem = MemStats::default();
    for line in status.lines() {
        if let Some(v) = kib_field(line, "VmRSS") {
            mem.allocated = v;
        } else if let Some(v) = kib_field(line, "VmHWM") {
            mem.total_allocated = v;
        } else if let Some(v) = kib_field(line, "VmSize") {
            mem.system_bytes = v;
        } else if let Some(v) = kib_field(line, "RssAnon") {
            mem.heap_allocated = v;
        } else if let Some(v) = kib_field(line, "VmData") {
            mem.heap_system_bytes = v;
        } else if let Some(v) = kib_field(line, "VmStk") {
            mem.stack_in_use = v;
            mem.stack_system_bytes = v;
        }
    }
    mem
}

fn thread_state(status: &str) -> String {
    status
        .lines()
        .find_map(|l| l.strip_prefix("State:"))
        .and_then(|s| s.split_once('(').map(|(_, rest)| rest.trim_end_matches(')')))
        .unwrap_or("unknown")
        .to_owned()
}

/// One line per distinct (state, name) pair with the number of threads in it.
fn thread_dump(task_dir: &Path) -> String {
    let Ok(entries) = fs::read_dir(task_dir) else {
        return String::new();
    };
    let mut buckets: BTreeMap<(String, String), usize> = BTreeMap::new();
    for entry in entries.flatten() {
        let dir = entry.path();
        let name = fs::read_to_string(dir.join("comm"))
            .map(|s| s.trim().to_owned())
            .unwrap_or_else(|_| "?".to_owned());
        let state = fs::read_to_string(dir.join("status"))
            .map(|s| thread_state(&s))
            .unwrap_or_else(|_| "unknown".to_owned());
        *buckets.entry((state, name)).or_default() += 1;
    }
    let mut out = String::new();
    for ((state, name), count) in &buckets {
        let _ = writeln!(out, "{count}: {state} [{name}]");
    }
    out
}

pub fn render_memory(mem: &MemStats) -> String {
    format!(
        "-------- Memory Details --------\n\
         MemAlloc\t: {}\n\
         TotalAlloc\t: {}\n\
         SysAlloc\t: {}\n\
         \n\
         HeapAlloc\t: {}\n\
         HeapSys\t\t: {}\n\
         \n\
         StackInUse\t: {}\n\
         StackSys\t: {}\n\
         --------------------------------\n",
        mem.allocated,
        mem.total_allocated,
        mem.system_bytes,
        mem.heap_allocated,
        mem.heap_system_bytes,
        mem.stack_in_use,
        mem.stack_system_bytes,
    )
}
