use super::{json_pretty, CliError, EXIT_STORE_ERROR, EXIT_SUCCESS};
use strata_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, CliError> {
    let report = engine.verify()?;

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!(
            "lineage of {}: {}/{} records passed",
            engine.namespace(),
            report.passed,
            report.checked
        );
        for v in &report.violations {
            println!("  FAIL {}: {}", v.key, v.reason);
        }
    }

    if report.is_clean() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_STORE_ERROR)
    }
}
