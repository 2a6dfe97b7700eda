//! hashequiv gRPC server
//!
//! Serves task hash equivalence lookups and reports over gRPC from a
//! persistent database directory.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgAction, Parser};
use tokio::signal;
use tonic::transport::Server;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hashequiv::config::ServerConfig;
use hashequiv::error::{HashEquivResult, TransportError};
use hashequiv::storage::open_database;
use hashequiv::transport::HashEquivServiceImpl;
use hashequiv::{EquivalenceEngine, EquivalenceStore};

/// Task hash equivalence server
#[derive(Parser, Debug)]
#[command(name = "hashequiv-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HASHEQUIV_CONFIG")]
    config: Option<PathBuf>,

    /// Database directory [default: ./hashes.db]
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Host address to bind [default: 0.0.0.0]
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to listen on [default: 8080]
    #[arg(short, long)]
    port: Option<u16>,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Resolve the effective config: defaults, then file, then flags.
    fn into_config(self) -> HashEquivResult<ServerConfig> {
        let mut config = match self.config {
            Some(ref path) => ServerConfig::load_from_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(database) = self.database {
            config.database = database;
        }
        if let Some(host) = self.host {
            config.set_host(host);
        }
        if let Some(port) = self.port {
            config.set_port(port);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> HashEquivResult<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise 0 = warn, 1 = info, 2+ = debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("hashequiv=warn"),
        1 => EnvFilter::new("hashequiv=info"),
        _ => EnvFilter::new("hashequiv=debug"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = cli.into_config()?;

    info!(database = %config.database.display(), "opening database");
    // Holds an exclusive lock for the process lifetime
    let store = Arc::new(open_database(&config.database, Some(config.store.clone()))?);
    info!(records = store.count()?, "database opened");

    if config.compact_on_start {
        match store.compact() {
            Ok(result) => info!(records = result.records_compacted, "startup compaction finished"),
            Err(e) => warn!(error = %e, "startup compaction failed"),
        }
    }

    let engine = Arc::new(EquivalenceEngine::new(store));
    let svc = HashEquivServiceImpl::new(engine).into_server();

    info!(listen = %config.listen, "starting gRPC server");
    Server::builder()
        .add_service(svc)
        .serve_with_shutdown(config.listen, async {
            if let Err(e) = signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await
        .map_err(|e| TransportError::ConnectionFailed {
            message: format!("server on {}: {e}", config.listen),
        })?;

    info!("shut down");
    Ok(())
}
