use super::{json_pretty, CliError, EXIT_SUCCESS};
use std::fmt::Write as _;
use std::io::Read;
use std::sync::Arc;
use strata_core::{render_memory, DebugInfo, Diagnostics, Engine, ProcessDiagnostics};
use tracing::debug;

/// Diagnostics of this process, including the engine it opened.
pub fn collect_local(engine: Engine) -> DebugInfo {
    ProcessDiagnostics::with_engine(Arc::new(engine)).collect()
}

fn debug_url(addr: &str) -> String {
    let base = addr.trim_end_matches('/');
    if base.contains("://") {
        format!("{base}/v1/debug")
    } else {
        format!("http://{base}/v1/debug")
    }
}

/// Fetch diagnostics from a running `strata-server`.
pub fn fetch_remote(addr: &str) -> Result<DebugInfo, CliError> {
    let url = debug_url(addr);
    debug!("GET {url}");
    let resp = match ureq::get(&url).call() {
        Ok(r) => r,
        Err(ureq::Error::StatusCode(code)) => {
            return Err(CliError::failure(format!("HTTP {code} for {url}")));
        }
        Err(e) => return Err(CliError::failure(format!("{url}: {e}"))),
    };
    let mut body = String::new();
    resp.into_body()
        .into_reader()
        .read_to_string(&mut body)
        .map_err(|e| CliError::failure(format!("{url}: {e}")))?;
    serde_json::from_str(&body)
        .map_err(|e| CliError::failure(format!("{url}: invalid debug payload: {e}")))
}

pub fn render(info: &DebugInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Strata Version : {}", info.version);
    let _ = writeln!(out, "GitCommit : {}", info.commit);
    out.push_str(&render_memory(&info.memory));
    if let Some(c) = &info.counters {
        let _ = writeln!(
            out,
            "Operations : prepared {} viewed {} committed {} removed {}",
            c.prepared, c.viewed, c.committed, c.removed
        );
        let _ = writeln!(
            out,
            "Conflicts : retried {} failed {}",
            c.conflicts_retried, c.failed
        );
    }
    if let Some(l) = &info.lineage {
        let _ = writeln!(
            out,
            "Lineage : {} records ({} active, {} committed, {} views)",
            l.total, l.active, l.committed, l.views
        );
    }
    out.push_str("Stack Dump : \n");
    out.push_str(&info.stack);
    out
}

pub fn run(info: &DebugInfo, json: bool) -> Result<u8, CliError> {
    if json {
        println!("{}", json_pretty(info)?);
    } else {
        print!("{}", render(info));
    }
    Ok(EXIT_SUCCESS)
}
