use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

use crate::error::Result;

/// Scratch directory for one run. Removed when dropped, on success and on
/// every error path alike.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new(label: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("narracut-{label}-"))
            .tempdir()?;
        debug!(path = %dir.path().display(), "Created workspace");
        Ok(Self { dir })
    }

    /// Place the workspace under `parent` instead of the system temp dir.
    pub fn new_in(parent: impl AsRef<Path>, label: &str) -> Result<Self> {
        std::fs::create_dir_all(parent.as_ref())?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("narracut-{label}-"))
            .tempdir_in(parent)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: impl AsRef<str>) -> PathBuf {
        self.dir.path().join(name.as_ref())
    }

    /// A subdirectory, created on demand.
    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }
}
