use super::{print_mounts, CliError, EXIT_SUCCESS};
use strata_core::{CancelToken, Engine, Snapshotter};

/// `prepare` and `view`: create an active snapshot and print its mounts.
pub fn run(
    engine: &Engine,
    cancel: &CancelToken,
    key: &str,
    parent: &str,
    readonly: bool,
    json: bool,
) -> Result<u8, CliError> {
    let mounts = if readonly {
        engine.view(cancel, key, parent)?
    } else {
        engine.prepare(cancel, key, parent)?
    };
    print_mounts(&mounts, json)?;
    Ok(EXIT_SUCCESS)
}
