//! WolfServe - Identity-Aware File Server
//!
//! Serves the current directory on a local port or on the WolfNet overlay.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfserve::config::{GatewayConfig, OperatingMode};
use wolfserve::diag::{DiagWriter, DiagnosticFilter};
use wolfserve::error::Result;
use wolfserve::lifecycle;

/// WolfServe - Identity-Aware File Server
#[derive(Parser)]
#[command(name = "wolfserve")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Run in local mode (plain HTTP, no overlay)
    #[arg(long)]
    local: bool,

    /// Port to listen on (local mode only)
    #[arg(long)]
    port: Option<u16>,

    /// Address to listen on in the overlay (TLS on port 443)
    #[arg(long)]
    addr: Option<String>,

    /// Hostname to use on the overlay
    #[arg(long)]
    hostname: Option<String>,

    /// Directory to store gateway and overlay state
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Directory to serve
    #[arg(long)]
    root: Option<PathBuf>,

    /// Open the served address in a browser once it is known
    #[arg(long)]
    open: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Cli {
    /// Overlay command line flags onto the file configuration
    fn apply(self, config: &mut GatewayConfig) {
        if self.local {
            config.server.mode = OperatingMode::Local;
        }
        if let Some(port) = self.port {
            config.server.port = Some(port);
        }
        if let Some(addr) = self.addr {
            config.overlay.addr = addr;
        }
        if let Some(hostname) = self.hostname {
            config.overlay.hostname = Some(hostname);
        }
        if let Some(dir) = self.dir {
            config.state.dir = dir;
        }
        if let Some(root) = self.root {
            config.server.root = root;
        }
        if self.open {
            config.server.open_browser = true;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => GatewayConfig::from_file(path),
        None => Ok(GatewayConfig::default()),
    };
    let level = cli
        .log_level
        .clone()
        .or_else(|| loaded.as_ref().ok().map(|c| c.logging.level.clone()))
        .unwrap_or_else(|| "info".to_string());

    // Initialize logging
    init_logging(&level);

    match start(cli, loaded).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_fatal() => {
            tracing::error!("Startup failed: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging through the diagnostic filter
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());
    let writer = DiagWriter::new(Arc::new(DiagnosticFilter::stderr()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();
}

async fn start(cli: Cli, loaded: Result<GatewayConfig>) -> Result<()> {
    let mut config = loaded?;
    cli.apply(&mut config);
    config.validate()?;

    let cwd = std::env::current_dir()?;
    let settings = config.into_settings(&cwd)?;
    tracing::debug!("Starting with {:?}", settings);

    lifecycle::run(settings).await
}
