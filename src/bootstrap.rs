//! Mode Bootstrap
//!
//! Turns [`Settings`] into a ready listener and identity resolver. Both are
//! produced together or startup fails; everything downstream is
//! mode-agnostic.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::config::{OperatingMode, Settings, DEFAULT_LOCAL_PORT};
use crate::error::{Error, Result};
use crate::identity::{IdentityResolver, LocalIdentity, OverlayIdentity};
use crate::overlay::{MeshProvider, OverlayProvider};
use crate::store::StateStore;

/// Delay between two overlay status polls
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long to wait for the overlay to reach the running state
pub const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Port on which overlay traffic is wrapped in TLS
const TLS_PORT: u16 = 443;

/// Shape of the bound listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerConfig {
    pub bind_addr: SocketAddr,
    pub tls: bool,
}

/// Bound listener, optionally terminating TLS
pub struct GatewayListener {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    config: ListenerConfig,
}

impl GatewayListener {
    pub fn new(listener: TcpListener, tls: Option<TlsAcceptor>) -> Result<Self> {
        let config = ListenerConfig {
            bind_addr: listener.local_addr()?,
            tls: tls.is_some(),
        };
        Ok(Self { listener, tls, config })
    }

    pub fn config(&self) -> ListenerConfig {
        self.config
    }

    pub fn into_parts(self) -> (TcpListener, Option<TlsAcceptor>) {
        (self.listener, self.tls)
    }
}

/// Terminal outcome of waiting for the overlay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready { url: String },
    TimedOut,
}

/// How the reachable address becomes known
pub enum Announce {
    /// Known at startup, already logged
    Ready(String),
    /// Reported by the readiness poller
    Pending(JoinHandle<Readiness>),
}

/// Everything the server needs, produced in one piece
pub struct Bootstrap {
    pub listener: GatewayListener,
    pub resolver: Arc<dyn IdentityResolver>,
    pub announce: Announce,
}

/// Build the listener and resolver for the configured mode
pub async fn bootstrap(settings: &Settings, store: &StateStore) -> Result<Bootstrap> {
    match settings.mode {
        OperatingMode::Local => bootstrap_local(settings, store).await,
        OperatingMode::Secured => {
            store.ensure()?;
            let provider = MeshProvider::open(&settings.hostname, store.path())?;
            let boot = bootstrap_secured(settings, Arc::new(provider.clone())).await?;
            // Keeps prompting for login after the readiness poller gives up
            provider.watch_login();
            Ok(boot)
        }
    }
}

/// Port for local mode: explicit, then remembered, then the default
pub fn resolve_port(explicit: Option<u16>, remembered: Option<u16>) -> u16 {
    explicit.or(remembered).unwrap_or(DEFAULT_LOCAL_PORT)
}

/// Plain listener with the placeholder identity
pub async fn bootstrap_local(settings: &Settings, store: &StateStore) -> Result<Bootstrap> {
    let port = resolve_port(settings.port, store.load_port());
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

    let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
        addr: addr.to_string(),
        source,
    })?;
    let listener = GatewayListener::new(listener, None)?;
    let bound = listener.config().bind_addr.port();

    if settings.port.is_some() {
        if let Err(e) = store.save_port(bound) {
            tracing::warn!("Could not remember port {}: {}", bound, e);
        }
    }

    let url = format!("http://localhost:{}", bound);
    tracing::info!("serving . at {} ...", url);

    Ok(Bootstrap {
        listener,
        resolver: Arc::new(LocalIdentity),
        announce: Announce::Ready(url),
    })
}

/// Overlay listener, TLS on 443, identities from the provider
pub async fn bootstrap_secured(
    settings: &Settings,
    provider: Arc<dyn OverlayProvider>,
) -> Result<Bootstrap> {
    let listener = provider.listen(settings.addr).await?;

    let tls = if settings.addr.port() == TLS_PORT {
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(provider.certificates());
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Some(TlsAcceptor::from(Arc::new(config)))
    } else {
        None
    };
    let listener = GatewayListener::new(listener, tls)?;
    tracing::debug!("Overlay listener ready: {:?}", listener.config());

    let poller = ReadinessPoller::new(Arc::clone(&provider), settings.addr.port());
    let announce = Announce::Pending(tokio::spawn(poller.run()));

    Ok(Bootstrap {
        listener,
        resolver: Arc::new(OverlayIdentity::new(provider)),
        announce,
    })
}

/// Externally reachable URL for a node name and listen port
pub fn announce_url(dns_name: &str, port: u16) -> String {
    let host = dns_name.trim_end_matches('.');
    let scheme = if port == TLS_PORT { "https" } else { "http" };
    match port {
        80 | TLS_PORT => format!("{}://{}", scheme, host),
        _ => format!("{}://{}:{}", scheme, host, port),
    }
}

/// Waits for the overlay to come up, then announces the address
pub struct ReadinessPoller {
    provider: Arc<dyn OverlayProvider>,
    port: u16,
    interval: Duration,
    timeout: Duration,
}

impl ReadinessPoller {
    pub fn new(provider: Arc<dyn OverlayProvider>, port: u16) -> Self {
        Self {
            provider,
            port,
            interval: POLL_INTERVAL,
            timeout: READY_TIMEOUT,
        }
    }

    /// Poll until running or timed out. The listener is unaffected either way.
    pub async fn run(self) -> Readiness {
        let wait = async {
            loop {
                match self.provider.status().await {
                    Ok(status) if status.is_running() => {
                        return status.reachable_name().to_string();
                    }
                    Ok(status) => {
                        tracing::debug!("Overlay state: {}", status.backend_state);
                    }
                    Err(e) => {
                        tracing::debug!("Overlay status query: {}", e);
                    }
                }
                tokio::time::sleep(self.interval).await;
            }
        };

        match tokio::time::timeout(self.timeout, wait).await {
            Ok(dns_name) => {
                let url = announce_url(&dns_name, self.port);
                tracing::info!("serving . at {}", url);
                Readiness::Ready { url }
            }
            Err(_) => {
                tracing::warn!(
                    "Overlay failed to reach the running state within {:?}; still listening",
                    self.timeout
                );
                Readiness::TimedOut
            }
        }
    }
}
