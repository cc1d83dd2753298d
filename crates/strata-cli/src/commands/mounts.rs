use super::{json_pretty, print_mounts, CliError, EXIT_SUCCESS};
use strata_core::{Engine, Snapshotter};

pub fn run(engine: &Engine, key: &str, overlay: bool, json: bool) -> Result<u8, CliError> {
    if !overlay {
        print_mounts(&engine.mounts(key)?, json)?;
        return Ok(EXIT_SUCCESS);
    }
    let mount = engine.overlay(key)?;
    if json {
        println!("{}", json_pretty(&mount)?);
    } else {
        println!("{} {} {}", mount.kind, mount.source, mount.options.join(","));
    }
    Ok(EXIT_SUCCESS)
}
