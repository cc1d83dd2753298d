use super::{json_pretty, CliError, EXIT_SUCCESS};
use strata_core::{CancelToken, Engine, Snapshotter};

pub fn run(engine: &Engine, cancel: &CancelToken, key: &str, json: bool) -> Result<u8, CliError> {
    engine.remove(cancel, key)?;
    if json {
        println!("{}", json_pretty(&serde_json::json!({ "removed": key }))?);
    } else {
        println!("removed {key}");
    }
    Ok(EXIT_SUCCESS)
}
