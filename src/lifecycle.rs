//! Lifecycle Controller
//!
//! Wires the pieces together for one process run: state directory,
//! bootstrap, style sheet, router, announcement and graceful shutdown.

use crate::bootstrap::{self, Announce, Bootstrap, Readiness};
use crate::config::{OperatingMode, Settings};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::render::Renderer;
use crate::server::{self, DRAIN_TIMEOUT};
use crate::store::StateStore;

/// Run the gateway until SIGINT or SIGTERM
pub async fn run(settings: Settings) -> Result<()> {
    let store = StateStore::new(&settings.state_dir);

    let Bootstrap {
        listener,
        resolver,
        announce,
    } = bootstrap::bootstrap(&settings, &store).await?;

    let renderer = Renderer::new(&settings.root, style_sheet(settings.mode, &store));
    let router = Dispatcher::new(resolver, renderer, &settings.root).into_router();

    watch_announce(announce, settings.open_browser);

    server::serve(listener, router, shutdown_signal()).await?;
    tracing::debug!("WolfServe stopped");
    Ok(())
}

/// Style sheet injected into rendered Markdown, read once at startup
pub fn style_sheet(mode: OperatingMode, store: &StateStore) -> Option<String> {
    match mode {
        OperatingMode::Secured => store.load_style(),
        OperatingMode::Local => None,
    }
}

fn watch_announce(announce: Announce, open_browser: bool) {
    match announce {
        Announce::Ready(url) => {
            if open_browser {
                tokio::spawn(open_in_browser(url));
            }
        }
        Announce::Pending(handle) => {
            tokio::spawn(async move {
                match handle.await {
                    Ok(Readiness::Ready { url }) if open_browser => open_in_browser(url).await,
                    Ok(_) => {}
                    Err(e) => tracing::error!("Readiness poller panicked: {}", e),
                }
            });
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!(
        "Received shutdown signal, shutting down (draining for up to {:?})",
        DRAIN_TIMEOUT
    );
}

/// Hand `url` to the desktop's default browser
pub async fn open_in_browser(url: String) {
    let mut command = if cfg!(target_os = "macos") {
        tokio::process::Command::new("open")
    } else if cfg!(windows) {
        let mut command = tokio::process::Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        tokio::process::Command::new("xdg-open")
    };

    match command.arg(&url).status().await {
        Ok(status) if status.success() => tracing::debug!("Opened {} in browser", url),
        Ok(status) => tracing::warn!("Failed to open browser for {}: {}", url, status),
        Err(e) => tracing::warn!("Failed to open browser for {}: {}", url, e),
    }
}
