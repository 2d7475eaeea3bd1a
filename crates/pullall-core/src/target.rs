use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{PullError, Result};

/// A directory that may hold a git checkout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    path: PathBuf,
}

impl Target {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The final path component, used to label log lines.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// List the immediate subdirectories of `root`, in the order the platform
/// returns them.
///
/// Entries that are not directories are ignored. Symlinks are classified by
/// the link itself, so a symlink to a directory is not a target.
pub fn discover(root: &Path) -> Result<Vec<Target>> {
    let entries = std::fs::read_dir(root).map_err(|source| PullError::Enumeration {
        root: root.to_path_buf(),
        source,
    })?;

    let read_entry = |source| PullError::ReadEntry {
        root: root.to_path_buf(),
        source,
    };

    let mut targets = Vec::new();
    for entry in entries {
        let entry = entry.map_err(read_entry)?;
        if entry.file_type().map_err(read_entry)?.is_dir() {
            targets.push(Target::new(root.join(entry.file_name())));
        }
    }
    Ok(targets)
}
