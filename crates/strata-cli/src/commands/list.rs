use super::{collect_infos, json_pretty, kind_label, kind_style, CliError, EXIT_SUCCESS};
use strata_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, CliError> {
    let infos = collect_infos(engine)?;
    if json {
        println!("{}", json_pretty(&infos)?);
    } else if infos.is_empty() {
        println!("no snapshots found");
    } else {
        println!("{:<24} {:<10} {:<24} CHILDREN", "NAME", "KIND", "PARENT");
        for info in &infos {
            let parent = info.parent.as_ref().map_or("", |p| p.as_str());
            let label = kind_label(info);
            // pad before colouring; escape codes would skew the width
            let kind = kind_style(label).apply_to(format!("{label:<10}"));
            println!("{:<24} {kind} {parent:<24} {}", info.name, info.children);
        }
    }
    Ok(EXIT_SUCCESS)
}
