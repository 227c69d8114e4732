//! WolfNet mesh provider
//!
//! The mesh daemon shares its state through the gateway's state directory:
//! - `hostname`: name requested by this gateway (written by us)
//! - `status.json`: node state and known peers (written by the daemon)
//! - `certs/<name>.crt`, `certs/<name>.key`: PEM certificate per served name

use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::{OverlayProvider, OverlayStatus};
use crate::error::{Error, Result};
use crate::identity::Identity;

/// Status file written by the mesh daemon
const STATUS_FILE: &str = "status.json";

/// Hostname requested from the mesh daemon
const HOSTNAME_FILE: &str = "hostname";

/// Certificate directory maintained by the mesh daemon
const CERTS_DIR: &str = "certs";

/// Delay between two login checks while the node is not running
pub const LOGIN_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Status file contents
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MeshStatus {
    #[serde(flatten)]
    node: OverlayStatus,
    #[serde(default)]
    peers: Vec<MeshPeer>,
}

/// A peer known to the mesh daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MeshPeer {
    /// Peer's mesh IP address
    address: IpAddr,
    /// Login name of the peer's owner
    login_name: String,
    /// Fully qualified node name
    computed_name: String,
}

/// Overlay provider backed by a WolfNet daemon sharing the state directory
#[derive(Debug, Clone)]
pub struct MeshProvider {
    hostname: String,
    dir: PathBuf,
}

impl MeshProvider {
    /// Attach to the mesh daemon rooted at `dir`, requesting `hostname`
    pub fn open(hostname: &str, dir: &Path) -> Result<Self> {
        if hostname.trim().is_empty() {
            return Err(Error::Provider("hostname cannot be empty".into()));
        }
        if !dir.is_dir() {
            return Err(Error::Provider(format!("state directory {:?} does not exist", dir)));
        }

        std::fs::write(dir.join(HOSTNAME_FILE), format!("{}\n", hostname)).map_err(|e| {
            Error::Provider(format!("failed to register hostname {}: {}", hostname, e))
        })?;
        tracing::debug!("Registered mesh hostname {} in {:?}", hostname, dir);

        Ok(Self {
            hostname: hostname.to_string(),
            dir: dir.to_path_buf(),
        })
    }

    /// Keep showing the login prompt until the node is running.
    ///
    /// The prompt is logged on every check; the diagnostic filter decides how
    /// often it is actually shown.
    pub fn watch_login(&self) -> JoinHandle<()> {
        let provider = self.clone();
        tokio::spawn(async move { provider.prompt_until_running().await })
    }

    async fn prompt_until_running(&self) {
        loop {
            match self.load_status() {
                Ok(Some(status)) if status.node.is_running() => {
                    tracing::debug!("Mesh node is running, login watch finished");
                    return;
                }
                Ok(Some(status)) => {
                    if let Some(url) = &status.node.auth_url {
                        tracing::info!(
                            "To start this server as {}, log in at: {}",
                            self.hostname,
                            url
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::debug!("Could not read mesh status: {}", e),
            }
            tokio::time::sleep(LOGIN_CHECK_INTERVAL).await;
        }
    }

    async fn read_status(&self) -> Result<Option<MeshStatus>> {
        parse_status(tokio::fs::read_to_string(self.dir.join(STATUS_FILE)).await)
    }

    // Synchronous read for the watcher loop
    fn load_status(&self) -> Result<Option<MeshStatus>> {
        parse_status(std::fs::read_to_string(self.dir.join(STATUS_FILE)))
    }
}

/// A missing status file means the daemon has not started yet
fn parse_status(read: std::io::Result<String>) -> Result<Option<MeshStatus>> {
    match read {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl OverlayProvider for MeshProvider {
    async fn listen(&self, addr: SocketAddr) -> Result<TcpListener> {
        TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })
    }

    fn certificates(&self) -> Arc<dyn ResolvesServerCert> {
        Arc::new(MeshCertResolver::new(self.dir.join(CERTS_DIR)))
    }

    async fn status(&self) -> Result<OverlayStatus> {
        let Some(status) = self.read_status().await? else {
            return Ok(OverlayStatus {
                backend_state: "NoState".into(),
                dns_name: String::new(),
                auth_url: None,
            });
        };

        Ok(status.node)
    }

    async fn who_is(&self, peer: SocketAddr) -> Result<Identity> {
        let status = self
            .read_status()
            .await?
            .ok_or_else(|| Error::Identity("mesh daemon has not published a status".into()))?;

        let ip = peer.ip().to_canonical();
        status
            .peers
            .into_iter()
            .find(|p| p.address.to_canonical() == ip)
            .map(|p| Identity::new(p.login_name, p.computed_name))
            .ok_or_else(|| Error::Identity(format!("no match for IP {}", ip)))
    }
}

/// Loads the mesh daemon's certificate for the requested server name
#[derive(Debug, Clone)]
pub struct MeshCertResolver {
    dir: PathBuf,
}

impl MeshCertResolver {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Certificate and key for `server_name`, read fresh from disk
    pub fn certified_key(&self, server_name: &str) -> Result<CertifiedKey> {
        if server_name.is_empty()
            || server_name.starts_with('.')
            || server_name.contains(['/', '\\'])
        {
            return Err(Error::Tls(format!("refusing server name {:?}", server_name)));
        }

        let cert_path = self.dir.join(format!("{}.crt", server_name));
        let key_path = self.dir.join(format!("{}.key", server_name));
        load_certified_key(&cert_path, &key_path)
    }
}

impl ResolvesServerCert for MeshCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(name) = client_hello.server_name() else {
            tracing::debug!("TLS client sent no server name");
            return None;
        };

        match self.certified_key(name) {
            Ok(key) => Some(Arc::new(key)),
            Err(e) => {
                tracing::warn!("Failed to load certificate for {}: {}", name, e);
                None
            }
        }
    }
}

/// Read a PEM certificate chain and private key into a rustls signing key
pub fn load_certified_key(cert_path: &Path, key_path: &Path) -> Result<CertifiedKey> {
    let mut reader = BufReader::new(File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<std::io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("no certificates in {:?}", cert_path)));
    }

    let mut reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| Error::Tls(format!("no private key in {:?}", key_path)))?;

    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)
        .map_err(|e| Error::Tls(e.to_string()))?;

    Ok(CertifiedKey::new(certs, signing_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::{Clock, DiagWriter, DiagnosticFilter, MemorySink};
    use tempfile::tempdir;
    use tracing_subscriber::layer::SubscriberExt;

    const STATUS: &str = r#"{
        "backend_state": "Running",
        "dns_name": "docs.mesh.example.",
        "peers": [
            { "address": "10.0.10.2", "login_name": "alice", "computed_name": "laptop.mesh.example" },
            { "address": "10.0.10.3", "login_name": "bob", "computed_name": "desktop.mesh.example" }
        ]
    }"#;

    fn provider_with_status(status: Option<&str>) -> (tempfile::TempDir, MeshProvider) {
        let dir = tempdir().unwrap();
        if let Some(status) = status {
            std::fs::write(dir.path().join(STATUS_FILE), status).unwrap();
        }
        let provider = MeshProvider::open("docs", dir.path()).unwrap();
        (dir, provider)
    }

    #[test]
    fn test_open_registers_hostname() {
        let (dir, provider) = provider_with_status(None);
        assert_eq!(provider.hostname, "docs");
        assert_eq!(
            std::fs::read_to_string(dir.path().join(HOSTNAME_FILE)).unwrap(),
            "docs\n"
        );
    }

    #[test]
    fn test_open_requires_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            MeshProvider::open("docs", &missing),
            Err(Error::Provider(_))
        ));
        assert!(MeshProvider::open("  ", dir.path()).is_err());
    }

    #[tokio::test]
    async fn test_status_running() {
        let (_dir, provider) = provider_with_status(Some(STATUS));
        let status = provider.status().await.unwrap();
        assert!(status.is_running());
        assert_eq!(status.reachable_name(), "docs.mesh.example");
    }

    #[tokio::test]
    async fn test_status_without_file_is_not_running() {
        let (_dir, provider) = provider_with_status(None);
        let status = provider.status().await.unwrap();
        assert!(!status.is_running());
    }

    #[tokio::test]
    async fn test_status_needs_login() {
        let (_dir, provider) = provider_with_status(Some(
            r#"{ "backend_state": "NeedsLogin", "auth_url": "https://login.mesh.example/a1b2" }"#,
        ));
        let status = provider.status().await.unwrap();
        assert!(!status.is_running());
        assert_eq!(status.auth_url.as_deref(), Some("https://login.mesh.example/a1b2"));
    }

    struct TokioClock;

    impl Clock for TokioClock {
        fn now(&self) -> std::time::Instant {
            tokio::time::Instant::now().into_std()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_prompt_repeats_until_running() {
        let (dir, provider) = provider_with_status(Some(
            r#"{ "backend_state": "NeedsLogin", "auth_url": "https://login.mesh.example/a1b2" }"#,
        ));

        let log = MemorySink::default();
        let filter = DiagnosticFilter::new(Box::new(log.clone()), Arc::new(TokioClock));
        let subscriber = tracing_subscriber::registry()
            .with(tracing_subscriber::filter::LevelFilter::INFO)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(DiagWriter::new(Arc::new(filter))),
            );
        let _guard = tracing::subscriber::set_default(subscriber);

        let watch = provider.watch_login();

        // Shown at start, then once per minute for as long as login is pending
        tokio::time::sleep(Duration::from_secs(130)).await;
        let prompts: Vec<_> = log
            .lines()
            .into_iter()
            .filter(|l| l.contains("To start this server as docs, log in at: https://login.mesh.example/a1b2"))
            .collect();
        assert_eq!(prompts.len(), 3);
        assert!(!watch.is_finished());

        std::fs::write(dir.path().join(STATUS_FILE), STATUS).unwrap();
        tokio::time::sleep(LOGIN_CHECK_INTERVAL * 2).await;
        assert!(watch.is_finished());
    }

    #[tokio::test]
    async fn test_who_is_matches_peer_ip() {
        let (_dir, provider) = provider_with_status(Some(STATUS));

        let who = provider.who_is("10.0.10.3:40000".parse().unwrap()).await.unwrap();
        assert_eq!(who.login_name, "bob");
        assert_eq!(who.device_label(), "desktop");

        // IPv4-mapped IPv6 peers resolve the same way
        let who = provider
            .who_is("[::ffff:10.0.10.2]:40000".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(who.login_name, "alice");
    }

    #[tokio::test]
    async fn test_who_is_unknown_peer() {
        let (_dir, provider) = provider_with_status(Some(STATUS));
        let err = provider.who_is("10.0.10.99:1".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, Error::Identity(_)));

        let (_dir, provider) = provider_with_status(None);
        assert!(provider.who_is("10.0.10.2:1".parse().unwrap()).await.is_err());
    }

    #[test]
    fn test_cert_resolver_loads_pem() {
        let dir = tempdir().unwrap();
        let cert = rcgen::generate_simple_self_signed(vec!["docs.mesh.example".into()]).unwrap();
        std::fs::write(
            dir.path().join("docs.mesh.example.crt"),
            cert.serialize_pem().unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("docs.mesh.example.key"),
            cert.serialize_private_key_pem(),
        )
        .unwrap();

        let resolver = MeshCertResolver::new(dir.path().to_path_buf());
        let key = resolver.certified_key("docs.mesh.example").unwrap();
        assert_eq!(key.cert.len(), 1);

        assert!(resolver.certified_key("other.mesh.example").is_err());
        assert!(matches!(
            resolver.certified_key("../docs.mesh.example"),
            Err(Error::Tls(_))
        ));
    }
}
