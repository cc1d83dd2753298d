use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use strata_core::{
    install_signal_handler, shutdown_token, Engine, EngineConfig, ProcessDiagnostics,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "strata-server", about = "Strata diagnostics endpoint", version)]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8321")]
    listen: String,

    /// Store root directory. Without it, only process figures are reported.
    #[arg(long)]
    store: Option<PathBuf>,

    /// Namespace whose counters and lineage are reported.
    #[arg(long)]
    namespace: Option<String>,

    /// Engine config file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<Option<EngineConfig>, strata_core::SnapshotError> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None if cli.store.is_none() => return Ok(None),
        None => EngineConfig::default(),
    }
    .with_env_overrides();
    if let Some(root) = &cli.store {
        config.root.clone_from(root);
    }
    if let Some(ns) = &cli.namespace {
        config.namespace.clone_from(ns);
    }
    Ok(Some(config))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STRATA_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let diagnostics = match load_config(&cli) {
        Ok(Some(config)) => match Engine::open(config) {
            Ok(engine) => {
                info!("reporting on namespace {}", engine.namespace());
                ProcessDiagnostics::with_engine(Arc::new(engine))
            }
            Err(e) => {
                error!("failed to open store: {e}");
                return ExitCode::FAILURE;
            }
        },
        Ok(None) => ProcessDiagnostics::new(),
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    install_signal_handler();
    match strata_server::run_server(&diagnostics, &cli.listen, &shutdown_token()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("failed to serve on {}: {e}", cli.listen);
            ExitCode::FAILURE
        }
    }
}
