use super::{json_pretty, CliError, EXIT_SUCCESS};
use std::fs;
use std::path::Path;
use strata_remote::get_resolver;
use tracing::info;

/// Resolve a remote reference and optionally download its archive.
pub fn run(reference: &str, output: Option<&Path>, json: bool) -> Result<u8, CliError> {
    let resolved = get_resolver().resolve(reference)?;

    let written = match output {
        Some(path) => {
            let data = resolved.fetcher.fetch(&resolved.descriptor)?;
            fs::write(path, &data).map_err(|e| {
                CliError::failure(format!("failed to write {}: {e}", path.display()))
            })?;
            info!("wrote {} bytes to {}", data.len(), path.display());
            Some(data.len())
        }
        None => None,
    };

    if json {
        let payload = serde_json::json!({
            "name": resolved.name,
            "descriptor": resolved.descriptor,
            "written": written,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("name:        {}", resolved.name);
        println!("url:         {}", resolved.descriptor.url);
        println!("object:      {}", resolved.descriptor.object);
        println!("media_type:  {}", resolved.descriptor.media_type);
        if let (Some(n), Some(path)) = (written, output) {
            println!("wrote {n} bytes to {}", path.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
