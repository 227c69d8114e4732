//! Request Dispatcher
//!
//! Every request is attributed to an identity, logged once, then handed to
//! the Markdown renderer or the static file service.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    response::{IntoResponse, Response},
    Router,
};
use percent_encoding::percent_decode_str;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::error::Error;
use crate::identity::{Identity, IdentityResolver};
use crate::listing::directory_index;
use crate::render::Renderer;

/// Upper bound on a single identity lookup
pub const IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);

/// One line of the access log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogEntry {
    /// Login name, or "unknown"
    pub identity: String,
    /// First label of the device name, empty when unknown
    pub device: String,
    /// Why the caller could not be identified
    pub reason: Option<String>,
    /// Decoded request path
    pub path: String,
}

impl AccessLogEntry {
    pub fn resolved(who: &Identity, path: &str) -> Self {
        Self {
            identity: single_line(&who.login_name),
            device: single_line(who.device_label()),
            reason: None,
            path: single_line(path),
        }
    }

    pub fn unresolved(reason: impl fmt::Display, path: &str) -> Self {
        Self {
            identity: "unknown".to_string(),
            device: String::new(),
            reason: Some(single_line(&reason.to_string())),
            path: single_line(path),
        }
    }
}

/// Escape control characters so a field can never start a new log line
fn single_line(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_control() {
            out.extend(c.escape_default());
        } else {
            out.push(c);
        }
    }
    out
}

impl fmt::Display for AccessLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "access: {} user ({}) {}", self.identity, reason, self.path),
            None => write!(f, "access: {} ({}) {}", self.identity, self.device, self.path),
        }
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct Dispatcher {
    resolver: Arc<dyn IdentityResolver>,
    renderer: Arc<Renderer>,
    root: Arc<PathBuf>,
    files: ServeDir,
}

impl Dispatcher {
    pub fn new(resolver: Arc<dyn IdentityResolver>, renderer: Renderer, root: &Path) -> Self {
        Self {
            resolver,
            renderer: Arc::new(renderer),
            root: Arc::new(root.to_path_buf()),
            files: ServeDir::new(root),
        }
    }

    /// Access log entry for a request; never fails
    pub async fn identify(&self, peer: Option<SocketAddr>, path: &str) -> AccessLogEntry {
        let Some(peer) = peer else {
            return AccessLogEntry::unresolved("no peer address", path);
        };

        match tokio::time::timeout(IDENTITY_TIMEOUT, self.resolver.resolve(peer)).await {
            Ok(Ok(who)) => AccessLogEntry::resolved(&who, path),
            Ok(Err(e)) => AccessLogEntry::unresolved(e, path),
            Err(_) => AccessLogEntry::unresolved(Error::Timeout("identity lookup"), path),
        }
    }

    /// Router sending every path through the dispatcher
    pub fn into_router(self) -> Router {
        Router::new().fallback(handle).with_state(self)
    }
}

async fn handle(
    State(dispatcher): State<Dispatcher>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    let path = percent_decode_str(request.uri().path())
        .decode_utf8_lossy()
        .into_owned();
    let entry = dispatcher
        .identify(connect_info.map(|ConnectInfo(peer)| peer), &path)
        .await;
    tracing::info!("{}", entry);

    if let Some(response) = dispatcher.renderer.render(request.method(), request.uri()).await {
        return response;
    }
    let listing = directory_index(&dispatcher.root, request.method(), request.uri());
    if let Some(response) = listing.await {
        return response;
    }

    match dispatcher.files.clone().oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}
