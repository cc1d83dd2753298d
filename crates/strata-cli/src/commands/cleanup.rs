use super::{json_pretty, CliError, EXIT_SUCCESS};
use strata_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, CliError> {
    let report = engine.cleanup()?;
    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!(
            "cleanup: removed {} orphaned directories, kept {}",
            report.removed.len(),
            report.kept
        );
        for id in &report.removed {
            println!("  removed {id}");
        }
    }
    Ok(EXIT_SUCCESS)
}
