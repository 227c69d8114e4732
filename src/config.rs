//! WolfServe Configuration
//!
//! Settings come from an optional TOML file overlaid with command line
//! flags, and are resolved once into an immutable [`Settings`] value.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Port used in local mode when none is given or remembered
pub const DEFAULT_LOCAL_PORT: u16 = 8080;

/// Operating mode, selected once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Plain listener, fixed placeholder identity
    Local,
    /// Overlay listener with TLS and per-peer identity
    #[default]
    Secured,
}

/// Main WolfServe configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Serving configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Overlay network configuration
    #[serde(default)]
    pub overlay: OverlayConfig,

    /// State directory configuration
    #[serde(default)]
    pub state: StateConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serving configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Operating mode
    #[serde(default)]
    pub mode: OperatingMode,

    /// Local mode port (falls back to the remembered port, then 8080)
    #[serde(default)]
    pub port: Option<u16>,

    /// Directory to serve
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Open the announced address in a browser
    #[serde(default)]
    pub open_browser: bool,
}

/// Overlay network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Hostname on the overlay (defaults to the current directory name)
    #[serde(default)]
    pub hostname: Option<String>,

    /// Listen address on the overlay; TLS is used on port 443
    #[serde(default = "default_overlay_addr")]
    pub addr: String,
}

/// State directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory holding the remembered port, style sheet and overlay state
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_overlay_addr() -> String {
    "0.0.0.0:443".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./wolfserve-state")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::default(),
            port: None,
            root: default_root(),
            open_browser: false,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            addr: default_overlay_addr(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Resolved startup settings, never re-read
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: OperatingMode,
    pub port: Option<u16>,
    pub addr: SocketAddr,
    pub hostname: String,
    pub state_dir: PathBuf,
    pub root: PathBuf,
    pub open_browser: bool,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.overlay.addr.parse::<SocketAddr>().is_err() {
            return Err(crate::Error::Config(format!(
                "overlay.addr is not a socket address: {}",
                self.overlay.addr
            )));
        }

        if matches!(&self.overlay.hostname, Some(h) if h.trim().is_empty()) {
            return Err(crate::Error::Config("overlay.hostname cannot be empty".into()));
        }

        if self.state.dir.as_os_str().is_empty() {
            return Err(crate::Error::Config("state.dir cannot be empty".into()));
        }

        Ok(())
    }

    /// Resolve into startup settings, defaulting the overlay hostname from `cwd`
    pub fn into_settings(self, cwd: &Path) -> crate::Result<Settings> {
        self.validate()?;

        let addr = self
            .overlay
            .addr
            .parse()
            .map_err(|e| crate::Error::Config(format!("overlay.addr: {}", e)))?;

        // Only the overlay needs a name; local mode never uses it
        let derived = self.overlay.hostname.or_else(|| hostname_from_dir(cwd));
        let hostname = match (self.server.mode, derived) {
            (_, Some(h)) => h,
            (OperatingMode::Local, None) => String::new(),
            (OperatingMode::Secured, None) => {
                return Err(crate::Error::Config(format!(
                    "cannot derive a hostname from {:?}; pass --hostname",
                    cwd
                )))
            }
        };

        Ok(Settings {
            mode: self.server.mode,
            port: self.server.port,
            addr,
            hostname,
            state_dir: self.state.dir,
            root: self.server.root,
            open_browser: self.server.open_browser,
        })
    }
}

/// Base name of a directory, used as the default overlay hostname
pub fn hostname_from_dir(dir: &Path) -> Option<String> {
    dir.file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
mode = "local"
port = 9000
root = "/srv/docs"

[overlay]
hostname = "docs"

[state]
dir = "/var/lib/wolfserve"

[logging]
level = "debug"
"#;

        let config = GatewayConfig::from_str(toml).unwrap();
        assert_eq!(config.server.mode, OperatingMode::Local);
        assert_eq!(config.server.port, Some(9000));
        assert_eq!(config.overlay.addr, "0.0.0.0:443");
        assert_eq!(config.logging.level, "debug");

        let settings = config.into_settings(Path::new("/home/me/notes")).unwrap();
        assert_eq!(settings.hostname, "docs");
        assert_eq!(settings.addr.port(), 443);
        assert_eq!(settings.state_dir, PathBuf::from("/var/lib/wolfserve"));
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_str("").unwrap();
        assert_eq!(config.server.mode, OperatingMode::Secured);
        assert_eq!(config.server.port, None);
        assert_eq!(config.state.dir, PathBuf::from("./wolfserve-state"));

        let settings = config.into_settings(Path::new("/home/me/notes")).unwrap();
        assert_eq!(settings.hostname, "notes");
        assert!(!settings.open_browser);
    }

    #[test]
    fn test_invalid_addr_rejected() {
        let toml = r#"
[overlay]
addr = ":443"
"#;
        assert!(matches!(
            GatewayConfig::from_str(toml),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_hostname_from_root_dir_fails() {
        let config = GatewayConfig::default();
        assert!(config.into_settings(Path::new("/")).is_err());
    }

    #[test]
    fn test_local_mode_from_root_dir() {
        let mut config = GatewayConfig::default();
        config.server.mode = OperatingMode::Local;

        let settings = config.into_settings(Path::new("/")).unwrap();
        assert_eq!(settings.mode, OperatingMode::Local);
        assert_eq!(settings.hostname, "");
    }
}
