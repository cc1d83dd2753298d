pub mod cleanup;
pub mod commit;
pub mod debug;
pub mod list;
pub mod mounts;
pub mod namespaces;
pub mod prepare;
pub mod remove;
pub mod resolve;
pub mod stat;
pub mod tree;
pub mod verify;

use console::Style;
use std::fmt;
use strata_core::{ErrorKind, Info, Kind, Mount, SnapshotError};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_CONSTRAINT: u8 = 4;

/// A failed command: the message for stderr and the process exit code.
#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
}

impl CliError {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_FAILURE,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

pub fn exit_code_for(kind: ErrorKind) -> u8 {
    match kind {
        k if k.is_constraint() => EXIT_CONSTRAINT,
        ErrorKind::Storage => EXIT_STORE_ERROR,
        _ => EXIT_FAILURE,
    }
}

impl From<SnapshotError> for CliError {
    fn from(e: SnapshotError) -> Self {
        let code = exit_code_for(e.kind());
        let message = match e.kind() {
            ErrorKind::Storage => format!("store error: {e}"),
            _ => e.to_string(),
        };
        Self { code, message }
    }
}

impl From<strata_remote::RemoteError> for CliError {
    fn from(e: strata_remote::RemoteError) -> Self {
        Self::failure(e.to_string())
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, CliError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CliError::failure(format!("JSON serialization failed: {e}")))
}

/// `view` for read-only active snapshots, otherwise the record kind.
pub fn kind_label(info: &Info) -> &'static str {
    match info.kind {
        Kind::Active if info.readonly => "view",
        Kind::Active => "active",
        Kind::Committed => "committed",
    }
}

pub fn kind_style(label: &str) -> Style {
    match label {
        "active" => Style::new().green(),
        "committed" => Style::new().blue(),
        "view" => Style::new().cyan(),
        _ => Style::new(),
    }
}

pub fn colorize_kind(label: &str) -> String {
    kind_style(label).apply_to(label).to_string()
}

/// One mount per line: `<type> <source> <options>`.
pub fn print_mounts(mounts: &[Mount], json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", json_pretty(&mounts)?);
        return Ok(());
    }
    if mounts.is_empty() {
        println!("no mounts");
    }
    for m in mounts {
        println!("{} {} {}", m.kind, m.source, m.options.join(","));
    }
    Ok(())
}

/// Collect every record through the walk interface.
pub fn collect_infos(engine: &impl strata_core::Snapshotter) -> Result<Vec<Info>, CliError> {
    let mut infos = Vec::new();
    engine.walk(&mut |info| {
        infos.push(info.clone());
        Ok(())
    })?;
    Ok(infos)
}
