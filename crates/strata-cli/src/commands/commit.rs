use super::{json_pretty, CliError, EXIT_SUCCESS};
use strata_core::{CancelToken, Engine, Snapshotter};

pub fn run(
    engine: &Engine,
    cancel: &CancelToken,
    name: &str,
    key: &str,
    json: bool,
) -> Result<u8, CliError> {
    engine.commit(cancel, name, key)?;
    if json {
        println!("{}", json_pretty(&engine.stat(name)?)?);
    } else {
        println!("committed {key} as {name}");
    }
    Ok(EXIT_SUCCESS)
}
