//! Persisted state directory
//!
//! Holds at most two files of our own: the remembered local-mode port and
//! an optional style sheet for rendered Markdown. The overlay provider keeps
//! its own files alongside them.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Remembered local-mode port, decimal text
pub const PORT_FILE: &str = "port";

/// Custom style sheet injected into rendered Markdown
pub const STYLE_FILE: &str = "style.css";

/// Directory-backed state for one gateway process
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Create the directory, owner-only on unix
    pub fn ensure(&self) -> Result<()> {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&self.dir).map_err(|source| Error::StateDir {
            path: self.dir.clone(),
            source,
        })
    }

    /// Remembered port, if present and well formed
    pub fn load_port(&self) -> Option<u16> {
        let path = self.dir.join(PORT_FILE);
        let content = std::fs::read_to_string(&path).ok()?;
        match content.trim().parse() {
            Ok(port) => Some(port),
            Err(e) => {
                tracing::debug!("Ignoring unreadable port file {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn save_port(&self, port: u16) -> Result<()> {
        self.ensure()?;
        std::fs::write(self.dir.join(PORT_FILE), format!("{}\n", port))?;
        Ok(())
    }

    /// Custom style sheet, if present
    pub fn load_style(&self) -> Option<String> {
        let path = self.dir.join(STYLE_FILE);
        match std::fs::read_to_string(&path) {
            Ok(style) => {
                tracing::debug!("Loaded style sheet from {:?}", path);
                Some(style)
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_port_round_trip() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state"));

        assert_eq!(store.load_port(), None);
        store.save_port(9123).unwrap();
        assert_eq!(store.load_port(), Some(9123));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("state").join(PORT_FILE)).unwrap(),
            "9123\n"
        );
    }

    #[test]
    fn test_garbage_port_ignored() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(PORT_FILE), "not-a-port").unwrap();
        let store = StateStore::new(dir.path());
        assert_eq!(store.load_port(), None);
    }

    #[test]
    fn test_style_optional() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.load_style().is_none());

        std::fs::write(dir.path().join(STYLE_FILE), "body { color: red; }").unwrap();
        assert_eq!(store.load_style().as_deref(), Some("body { color: red; }"));
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested").join("state"));
        store.ensure().unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_ensure_fails_on_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, "x").unwrap();

        let err = StateStore::new(&file).ensure().unwrap_err();
        assert!(matches!(err, Error::StateDir { .. }));
    }
}
