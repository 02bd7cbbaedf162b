use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::config::SYSTEM_ROOTS;
use crate::error::{Error, Result};

/// Gate for destructive filesystem operations.
///
/// A path passes when it is absolute, resolves (following every symlink)
/// without error, contains no parent segment after resolution and is
/// neither a deny-listed system root nor nested under one.
#[derive(Clone, Debug)]
pub struct PathGuard {
    roots: Vec<PathBuf>,
}

impl Default for PathGuard {
    fn default() -> Self {
        Self::with_roots(SYSTEM_ROOTS)
    }
}

impl PathGuard {
    pub fn with_roots<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self { roots: roots.into_iter().map(Into::into).collect() }
    }

    pub fn validate(&self, path: &Path) -> bool {
        self.resolve(path).is_ok()
    }

    /// Returns the resolved path, or why it was refused.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        if !path.is_absolute() {
            warn!(path = %path.display(), "path validation failed: not absolute");
            return Err(Error::validation(format!("not an absolute path: {}", path.display())));
        }

        let resolved = std::fs::canonicalize(path).map_err(|e| {
            warn!(path = %path.display(), error = %e, "path validation failed: cannot resolve");
            Error::validation(format!("cannot resolve {}: {e}", path.display()))
        })?;

        if resolved.components().any(|c| c == Component::ParentDir) {
            warn!(path = %path.display(), "path validation failed: traversal detected");
            return Err(Error::validation(format!("path traversal detected: {}", path.display())));
        }

        if let Some(root) = self.roots.iter().find(|root| resolved.starts_with(root)) {
            warn!(resolved = %resolved.display(), root = %root.display(), "path validation failed: system directory");
            return Err(Error::validation(format!("refusing to touch system directory: {}", resolved.display())));
        }

        Ok(resolved)
    }
}
