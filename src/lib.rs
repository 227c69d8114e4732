//! WolfServe - Identity-Aware File Server
//!
//! Serves a local directory over HTTP, either on a plain local port or on a
//! WolfNet overlay where every request is attributed to the mesh identity
//! behind the peer address.
//!
//! # Architecture
//!
//! A mode bootstrap produces the listener and identity resolver together.
//! Everything after that is mode-agnostic: the dispatcher logs one access
//! line per request, renders Markdown inline and hands the rest to a static
//! file service. All log output passes through a diagnostic filter that
//! keeps only operational lines and throttles the overlay login prompt.
//!
//! # Features
//!
//! - Local and secured (overlay + TLS) operating modes
//! - Per-request identity attribution with an access log
//! - GitHub-flavoured Markdown rendering with a `?raw` escape hatch
//! - Remembered local port and optional custom style sheet
//! - Graceful shutdown with a bounded drain

pub mod bootstrap;
pub mod config;
pub mod diag;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod listing;
pub mod overlay;
pub mod render;
pub mod server;
pub mod store;

pub use config::{GatewayConfig, OperatingMode, Settings};
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bootstrap::{Bootstrap, GatewayListener, ListenerConfig, Readiness};
    pub use crate::config::{GatewayConfig, OperatingMode, Settings};
    pub use crate::diag::DiagnosticFilter;
    pub use crate::error::{Error, Result};
    pub use crate::identity::{Identity, IdentityResolver};
    pub use crate::overlay::{OverlayProvider, OverlayStatus};
    pub use crate::store::StateStore;
}
