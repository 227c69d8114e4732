//! Overlay Network Module
//!
//! The overlay provider owns everything about the private network: the
//! listener, the TLS certificates and the mapping from peer address to
//! identity. WolfServe only consumes it through [`OverlayProvider`].

mod mesh;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::server::ResolvesServerCert;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::error::Result;
use crate::identity::Identity;

pub use mesh::{MeshCertResolver, MeshProvider};

/// Backend state reported once the node has joined the overlay
pub const STATE_RUNNING: &str = "Running";

/// Snapshot of the overlay node's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayStatus {
    /// Backend state, e.g. "NeedsLogin", "Starting", "Running"
    pub backend_state: String,
    /// Fully qualified name of this node, possibly with a trailing dot
    #[serde(default)]
    pub dns_name: String,
    /// Login URL while the node waits for a human to authorize it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
}

impl OverlayStatus {
    pub fn is_running(&self) -> bool {
        self.backend_state == STATE_RUNNING
    }

    /// Node name without the trailing root dot
    pub fn reachable_name(&self) -> &str {
        self.dns_name.trim_end_matches('.')
    }
}

/// An overlay network the gateway can serve on
#[async_trait]
pub trait OverlayProvider: Send + Sync {
    /// Listener reachable from the overlay
    async fn listen(&self, addr: SocketAddr) -> Result<TcpListener>;

    /// Certificate source consulted on every TLS handshake
    fn certificates(&self) -> Arc<dyn ResolvesServerCert>;

    /// Current node state
    async fn status(&self) -> Result<OverlayStatus>;

    /// Identity owning the given peer address
    async fn who_is(&self, peer: SocketAddr) -> Result<Identity>;
}
