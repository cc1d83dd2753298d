use super::{json_pretty, CliError, EXIT_SUCCESS};
use strata_core::Engine;

pub fn run(engine: &Engine, remove: Option<&str>, json: bool) -> Result<u8, CliError> {
    if let Some(name) = remove {
        engine.remove_namespace(name)?;
        if json {
            println!("{}", json_pretty(&serde_json::json!({ "removed": name }))?);
        } else {
            println!("removed namespace {name}");
        }
        return Ok(EXIT_SUCCESS);
    }

    let names = engine.namespaces()?;
    if json {
        println!("{}", json_pretty(&names)?);
    } else {
        for name in &names {
            let marker = if name == engine.namespace() { "*" } else { " " };
            println!("{marker} {name}");
        }
    }
    Ok(EXIT_SUCCESS)
}
