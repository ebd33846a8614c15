//! `execute`: run a protocol graph to completion, or resume a persisted one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use labsched::config::ExecutorConfig;
use labsched::driver::{Driver, DummyDriver};
use labsched::executor::{Executor, ExecutorError};
use labsched::graph::Graph;
use labsched::storage::{JsonStorage, LocalJsonStorage, StorageError};

/// Run a lab-automation protocol graph under the scheduling executor.
#[derive(Debug, Parser)]
#[command(name = "execute", version, about)]
struct Cli {
    /// Path to a protocol definition: a single `Start`-rooted JSON document.
    #[arg(long, conflicts_with = "resume", required_unless_present = "resume")]
    protocolfile: Option<PathBuf>,

    /// Load the most recent persisted state instead of a fresh protocol.
    #[arg(long, conflicts_with = "protocolfile", required_unless_present = "protocolfile")]
    resume: bool,

    /// Load a specific snapshot file instead of the most recent one under
    /// `--payloaddir`. Only meaningful alongside `--resume`.
    #[arg(long, requires = "resume")]
    load: Option<PathBuf>,

    /// Integer seconds of headroom added to every protocol's effective
    /// duration before optimizing.
    #[arg(long, default_value_t = 0)]
    buffer: i64,

    /// Driver to run work units through. Only `dummy` is built in.
    #[arg(long, default_value = "dummy")]
    driver: String,

    /// Persistence directory.
    #[arg(long, env = "LABSCHED_PAYLOAD_DIR")]
    payloaddir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
enum CliError {
    #[error("unknown driver `{0}`, only `dummy` is built in")]
    #[diagnostic(code(labsched::cli::unknown_driver))]
    UnknownDriver(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Executor(#[from] ExecutorError),

    #[error("reading protocol file: {0}")]
    #[diagnostic(code(labsched::cli::protocol_file))]
    ProtocolFile(String),
}

fn build_driver(name: &str) -> Result<Arc<dyn Driver>, CliError> {
    match name {
        "dummy" => Ok(Arc::new(DummyDriver::new(Duration::from_secs(2)))),
        other => Err(CliError::UnknownDriver(other.to_string())),
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    labsched::telemetry::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        tracing::error!(error = %err, "execute failed");
        return Err(err.into());
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let payload_dir = ExecutorConfig::resolve_payload_dir(cli.payloaddir);
    let storage = Arc::new(LocalJsonStorage::new(&payload_dir)?);
    let driver = build_driver(&cli.driver)?;

    let config = ExecutorConfig::default().with_buffer_seconds(cli.buffer);
    let mut executor = Executor::new(config, driver, storage.clone());

    if cli.resume {
        if let Some(path) = cli.load {
            let bytes = std::fs::read(&path)?;
            let value: serde_json::Value = serde_json::from_slice(&bytes)
                .map_err(|e| CliError::ProtocolFile(e.to_string()))?;
            storage.save(&value, None).await?;
        }
        executor.resume().await?;
    } else if let Some(path) = cli.protocolfile {
        let bytes = std::fs::read(&path)?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| CliError::ProtocolFile(e.to_string()))?;
        let graph = Graph::decode(&value).map_err(|e| CliError::ProtocolFile(e.to_string()))?;
        executor.add_protocol(graph).await?;
    }

    executor.run_loop().await?;
    Ok(())
}
