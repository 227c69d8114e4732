//! Identity resolution
//!
//! Maps a peer address to the person and device behind it. Local mode
//! answers with a fixed placeholder; secured mode asks the overlay.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::overlay::OverlayProvider;

/// Who is on the other end of a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Login name of the owning user
    pub login_name: String,
    /// Fully qualified node name of the peer device
    pub device: String,
}

impl Identity {
    pub fn new(login_name: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            login_name: login_name.into(),
            device: device.into(),
        }
    }

    /// First DNS label of the device name
    pub fn device_label(&self) -> &str {
        first_label(&self.device)
    }
}

fn first_label(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// Resolves a peer address to an identity
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, peer: SocketAddr) -> Result<Identity>;
}

/// Placeholder identity for local mode
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalIdentity;

impl LocalIdentity {
    pub const LOGIN_NAME: &'static str = "local-user";
    pub const DEVICE: &'static str = "localhost";
}

#[async_trait]
impl IdentityResolver for LocalIdentity {
    async fn resolve(&self, _peer: SocketAddr) -> Result<Identity> {
        Ok(Identity::new(Self::LOGIN_NAME, Self::DEVICE))
    }
}

/// Identity lookups answered by the overlay provider
#[derive(Clone)]
pub struct OverlayIdentity {
    provider: Arc<dyn OverlayProvider>,
}

impl OverlayIdentity {
    pub fn new(provider: Arc<dyn OverlayProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl IdentityResolver for OverlayIdentity {
    async fn resolve(&self, peer: SocketAddr) -> Result<Identity> {
        self.provider.who_is(peer).await
    }
}
