use super::{colorize_kind, json_pretty, kind_label, CliError, EXIT_SUCCESS};
use strata_core::{Engine, Snapshotter};

pub fn run(engine: &Engine, key: &str, json: bool) -> Result<u8, CliError> {
    let info = engine.stat(key)?;
    if json {
        println!("{}", json_pretty(&info)?);
    } else {
        println!("name:        {}", info.name);
        println!(
            "parent:      {}",
            info.parent.as_ref().map_or("(none)", |p| p.as_str())
        );
        println!("kind:        {}", colorize_kind(kind_label(&info)));
        println!("children:    {}", info.children);
        println!("created_at:  {}", info.created_at);
        println!("updated_at:  {}", info.updated_at);
    }
    Ok(EXIT_SUCCESS)
}
