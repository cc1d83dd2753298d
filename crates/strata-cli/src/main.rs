mod commands;

use clap::{Parser, Subcommand};
use commands::CliError;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use strata_core::{install_signal_handler, shutdown_token, Engine, EngineConfig};

#[derive(Debug, Parser)]
#[command(
    name = "strata",
    version,
    about = "Copy-on-write snapshot and layer engine"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Args)]
struct GlobalArgs {
    /// Path to the Strata store directory.
    #[arg(long, global = true)]
    store: Option<String>,

    /// Namespace to operate on.
    #[arg(long, global = true)]
    namespace: Option<String>,

    /// Engine config file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a writable snapshot and print its mounts.
    Prepare {
        key: String,
        /// Committed snapshot to build on. Omit for a base layer.
        #[arg(default_value = "")]
        parent: String,
    },
    /// Create a read-only snapshot and print its mounts.
    View {
        key: String,
        #[arg(default_value = "")]
        parent: String,
    },
    /// Print the mounts of an active snapshot.
    Mounts {
        key: String,
        /// Collapse the mounts into a single overlay mount.
        #[arg(long, default_value_t = false)]
        overlay: bool,
    },
    /// Commit active snapshot KEY under NAME.
    Commit { name: String, key: String },
    /// Remove a snapshot with no children.
    Remove { key: String },
    /// Show one snapshot.
    Stat { key: String },
    /// List all snapshots in the namespace.
    List,
    /// Show the snapshot lineage as a tree.
    Tree,
    /// Check the lineage invariants of the namespace.
    Verify,
    /// Delete snapshot directories no record refers to.
    Cleanup,
    /// List namespaces, or remove one.
    Namespaces {
        #[arg(long)]
        remove: Option<String>,
    },
    /// Show version, memory and thread diagnostics.
    Debug {
        /// Query a running strata-server instead of this process.
        #[arg(long)]
        addr: Option<String>,
    },
    /// Resolve a remote layer reference.
    Resolve {
        reference: String,
        /// Download the archive to this file.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Config file, then environment, then flags.
fn engine_config(global: &GlobalArgs) -> Result<EngineConfig, CliError> {
    let mut config = match &global.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    }
    .with_env_overrides();
    if let Some(store) = &global.store {
        config.root = expand_tilde(store);
    }
    if let Some(ns) = &global.namespace {
        config.namespace.clone_from(ns);
    }
    Ok(config)
}

fn load_config(path: &Path) -> Result<EngineConfig, CliError> {
    EngineConfig::load(path).map_err(|e| {
        let mut err = CliError::from(e);
        err.message = format!("config {}: {}", path.display(), err.message);
        err
    })
}

fn run(cli: Cli) -> Result<u8, CliError> {
    let Cli { global, command } = cli;
    let json = global.json;
    let cancel = shutdown_token();
    let open = || -> Result<Engine, CliError> { Ok(Engine::open(engine_config(&global)?)?) };

    match command {
        Commands::Prepare { key, parent } => {
            commands::prepare::run(&open()?, &cancel, &key, &parent, false, json)
        }
        Commands::View { key, parent } => {
            commands::prepare::run(&open()?, &cancel, &key, &parent, true, json)
        }
        Commands::Mounts { key, overlay } => commands::mounts::run(&open()?, &key, overlay, json),
        Commands::Commit { name, key } => {
            commands::commit::run(&open()?, &cancel, &name, &key, json)
        }
        Commands::Remove { key } => commands::remove::run(&open()?, &cancel, &key, json),
        Commands::Stat { key } => commands::stat::run(&open()?, &key, json),
        Commands::List => commands::list::run(&open()?, json),
        Commands::Tree => commands::tree::run(&open()?, json),
        Commands::Verify => commands::verify::run(&open()?, json),
        Commands::Cleanup => commands::cleanup::run(&open()?, json),
        Commands::Namespaces { remove } => {
            commands::namespaces::run(&open()?, remove.as_deref(), json)
        }
        Commands::Debug { addr: Some(addr) } => {
            commands::debug::run(&commands::debug::fetch_remote(&addr)?, json)
        }
        Commands::Debug { addr: None } => {
            commands::debug::run(&commands::debug::collect_local(open()?), json)
        }
        Commands::Resolve { reference, output } => {
            commands::resolve::run(&reference, output.as_deref(), json)
        }
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.global.trace {
        "trace"
    } else if cli.global.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STRATA_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("strata").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn prepare_parent_defaults_to_empty() {
        match parse(&["prepare", "L1"]).command {
            Commands::Prepare { key, parent } => {
                assert_eq!(key, "L1");
                assert!(parent.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = parse(&["list", "--json", "--namespace", "ns1", "--store", "/tmp/s"]);
        assert!(cli.global.json);
        assert_eq!(cli.global.namespace.as_deref(), Some("ns1"));
        let config = engine_config(&cli.global).unwrap();
        assert_eq!(config.root, PathBuf::from("/tmp/s"));
        assert_eq!(config.namespace, "ns1");
    }

    #[test]
    fn debug_addr_is_optional() {
        assert!(matches!(
            parse(&["debug", "--addr", "127.0.0.1:1"]).command,
            Commands::Debug { addr: Some(_) }
        ));
        assert!(matches!(parse(&["debug"]).command, Commands::Debug { addr: None }));
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(expand_tilde("~/s"), PathBuf::from(home).join("s"));
        }
        assert_eq!(expand_tilde("/abs"), PathBuf::from("/abs"));
    }

    #[test]
    fn config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "root = \"/srv/strata\"\nnamespace = \"ci\"\n").unwrap();
        let cli = parse(&["--config", path.to_str().unwrap(), "list"]);
        let config = engine_config(&cli.global).unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/strata"));
        assert_eq!(config.namespace, "ci");
    }

    #[test]
    fn bad_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "bogus = 1\n").unwrap();
        let cli = parse(&["--config", path.to_str().unwrap(), "list"]);
        let err = engine_config(&cli.global).unwrap_err();
        assert!(err.message.starts_with("config "));
    }
}
