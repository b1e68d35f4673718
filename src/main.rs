//! nftset-api - HTTP control surface for nftables address sets
//!
//! Adds, removes and flushes IP addresses in named sets of a pre-existing
//! nftables table. Per-family sets (`<prefix>4`, `<prefix>6`) are created on
//! first use.
//!
//! # Usage
//!
//! ```bash
//! nftset-api --table filter --listen '[::1]:8082'
//!
//! curl -X PUT    'http://[::1]:8082/set/blocked/203.0.113.5'   # {"success":"added"}
//! curl -X DELETE 'http://[::1]:8082/set/blocked/203.0.113.5'   # {"success":"deleted"}
//! curl -X POST   'http://[::1]:8082/set/blocked4/flush'        # {"result":"requested"}
//! curl -X POST   'http://[::1]:8082/set/blocked/flush?families=all'
//! ```
//!
//! # Security
//!
//! - Needs root or `CAP_NET_ADMIN`, or an explicit `--elevation` method
//! - Listens on loopback by default; there is no authentication

use clap::Parser;
use nftset_api::api::{self, AppState};
use nftset_api::audit::AuditLog;
use nftset_api::config::{self, Backend, ServiceConfig};
use nftset_api::core::backend::Connector;
use nftset_api::core::engine::Engine;
use nftset_api::core::memory::{MemoryConnector, MemoryKernel};
use nftset_api::core::nft_json::NftConnector;
use nftset_api::core::ruleset::TableFamily;
use nftset_api::elevation::ElevationMethod;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "nftset-api", version, long_version = build::CLAP_LONG_VERSION)]
#[command(about = "HTTP control surface for nftables address-set membership", long_about = None)]
struct Cli {
    /// JSON config file; CLI flags override its values
    #[arg(short, long, env = "NFTSET_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
    /// Address and port to listen on
    #[arg(short, long, env = "NFTSET_LISTEN")]
    listen: Option<SocketAddr>,
    /// Target table holding the sets
    #[arg(short, long, env = "NFTSET_TABLE")]
    table: Option<String>,
    /// Also require the table to have this family (ip, ip6, inet, ...)
    #[arg(long, env = "NFTSET_TABLE_FAMILY")]
    table_family: Option<TableFamily>,
    /// Kernel backend: nft or memory
    #[arg(long, env = "NFTSET_BACKEND")]
    backend: Option<Backend>,
    /// nft binary name or path
    #[arg(long, env = "NFTSET_NFT_COMMAND")]
    nft_command: Option<String>,
    /// Run nft through sudo or run0 when not root
    #[arg(long, env = "NFTSET_ELEVATION")]
    elevation: Option<ElevationMethod>,
    /// Write logs here instead of stderr
    #[arg(long, env = "NFTSET_LOG_FILE", value_name = "PATH")]
    log_file: Option<PathBuf>,
    /// Append a JSON-lines record of every mutation here
    #[arg(long, env = "NFTSET_AUDIT_LOG", value_name = "PATH")]
    audit_log: Option<PathBuf>,
    /// Per-request deadline (1-300)
    #[arg(long, env = "NFTSET_REQUEST_TIMEOUT", value_name = "SECONDS")]
    request_timeout: Option<u64>,
}

impl Cli {
    fn apply(self, config: &mut ServiceConfig) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(table) = self.table {
            config.table = table;
        }
        if self.table_family.is_some() {
            config.table_family = self.table_family;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(nft_command) = self.nft_command {
            config.nft_command = nft_command;
        }
        if self.elevation.is_some() {
            config.elevation = self.elevation;
        }
        if self.log_file.is_some() {
            config.log_file = self.log_file;
        }
        if self.audit_log.is_some() {
            config.audit_log = self.audit_log;
        }
        if let Some(secs) = self.request_timeout {
            config.request_timeout_secs = secs;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path).await?,
        None => ServiceConfig::default(),
    };
    cli.apply(&mut config);

    init_logging(config.log_file.as_deref());
    config.validate()?;

    info!("** Starting nftset-api {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen = %config.listen,
        table = %config.table,
        backend = %config.backend,
        "** Listening"
    );

    let listener = TcpListener::bind(config.listen).await?;

    match config.backend {
        Backend::Nft => {
            if config.elevation.is_none() && !nix::unistd::getuid().is_root() {
                warn!("Not running as root and no elevation configured; nft may be denied");
            }
            let connector = NftConnector::new(config.nft_command.clone(), config.elevation);
            serve_with(connector, &config, listener).await?;
        }
        Backend::Memory => {
            warn!("Memory backend: set changes never reach the kernel");
            let kernel = MemoryKernel::new();
            kernel.add_table(
                config.table_family.unwrap_or(TableFamily::Inet),
                &config.table,
            );
            serve_with(MemoryConnector::new(kernel), &config, listener).await?;
        }
    }

    info!("nftset-api stopped");
    Ok(())
}

async fn serve_with<C: Connector>(
    connector: C,
    config: &ServiceConfig,
    listener: TcpListener,
) -> std::io::Result<()> {
    let engine = Engine::new(connector, config.engine_config());
    let mut state = AppState::new(engine, config.request_timeout());
    if let Some(path) = &config.audit_log {
        info!(path = %path.display(), "Audit log enabled");
        state = state.with_audit(AuditLog::new(path));
    }

    api::serve(listener, api::router(Arc::new(state)), wait_for_shutdown()).await
}

/// Logs to `log_file` when it can be opened, stderr otherwise.
fn init_logging(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(path) = log_file {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(file)
                    .init();
                return;
            }
            Err(e) => {
                eprintln!(
                    "Warning: cannot open log file {}: {e}; logging to stderr",
                    path.display()
                );
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves on SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => info!("received SIGINT (Ctrl+C), shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
