//! Common type definitions.
//!
//! - [`Mode`]: encrypt or decrypt, used by the handshake table and the UI
//! - [`Target`]: one filesystem entry selected by the caller
//! - [`EncryptReport`] / [`DecryptReport`]: per-item batch outcomes

use std::path::{Path, PathBuf};

use strum::{Display, EnumIter};

use crate::config::ARTIFACT_EXTENSION;
use crate::error::{Error, ItemError, Result};

/// Direction of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Mode {
    #[strum(serialize = "Encrypt")]
    Encrypt,

    #[strum(serialize = "Decrypt")]
    Decrypt,
}

impl Mode {
    /// Progress label shown while the operation runs.
    #[inline]
    pub fn progress_label(self) -> &'static str {
        match self {
            Self::Encrypt => "Encrypting...",
            Self::Decrypt => "Decrypting...",
        }
    }

    /// Picks the mode a selection implies: all `.age` means decrypt.
    pub fn infer<P: AsRef<Path>>(paths: &[P]) -> Self {
        let all_artifacts = !paths.is_empty() && paths.iter().all(|p| p.as_ref().as_os_str().to_string_lossy().ends_with(ARTIFACT_EXTENSION));
        if all_artifacts { Self::Decrypt } else { Self::Encrypt }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// A filesystem entry selected for an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    path: PathBuf,
    kind: EntryKind,
}

impl Target {
    /// Inspects `path` without following a final symlink.
    ///
    /// Symlinks, sockets and other special files are not valid targets.
    pub fn inspect(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let meta = std::fs::symlink_metadata(&path).map_err(|e| Error::io_at("cannot access", &path, e))?;
        let kind = if meta.is_file() {
            EntryKind::File
        } else if meta.is_dir() {
            EntryKind::Directory
        } else {
            return Err(Error::validation(format!("not a regular file or directory: {}", path.display())));
        };

        Ok(Self { path, kind })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn exists(&self) -> bool {
        std::fs::symlink_metadata(&self.path).is_ok()
    }

    /// Final path component, used as the staged entry name.
    pub fn basename(&self) -> Result<&std::ffi::OsStr> {
        self.path.file_name().ok_or_else(|| Error::validation(format!("path has no file name: {}", self.path.display())))
    }
}

/// Human label for a selection, e.g. "Encrypt 2 files + 1 folder".
pub fn describe_selection(targets: &[Target]) -> String {
    let files = targets.iter().filter(|t| !t.is_dir()).count();
    let folders = targets.len() - files;

    if targets.len() == 1 {
        return if folders == 1 { "Encrypt folder".to_owned() } else { "Encrypt file".to_owned() };
    }

    let mut parts = Vec::new();
    if files > 0 {
        parts.push(format!("{files} file{}", if files > 1 { "s" } else { "" }));
    }
    if folders > 0 {
        parts.push(format!("{folders} folder{}", if folders > 1 { "s" } else { "" }));
    }

    format!("Encrypt {}", parts.join(" + "))
}

/// Result of deleting one original after a successful encryption.
#[derive(Debug)]
pub enum Removal {
    /// Overwritten by the secure delete tool, then unlinked
    Shredded,
    /// Removed without overwriting
    Unlinked,
    /// Directory removed recursively
    Tree,
    Failed(ItemError),
}

#[derive(Debug)]
pub struct EncryptReport {
    pub artifact: PathBuf,
    pub artifact_size: u64,
    pub staged: usize,
    pub scrubbed: usize,
    pub removals: Vec<(PathBuf, Removal)>,
}

impl EncryptReport {
    pub fn originals_deleted(&self) -> usize {
        self.removals.iter().filter(|(_, r)| !matches!(r, Removal::Failed(_))).count()
    }

    pub fn removal_failures(&self) -> usize {
        self.removals.len() - self.originals_deleted()
    }
}

/// Where a decrypted payload ended up.
#[derive(Debug, PartialEq, Eq)]
pub enum Restored {
    /// Plain file moved to this path
    File(PathBuf),
    /// Archive extracted into this directory
    Extracted { into: PathBuf, members: usize },
}

#[derive(Debug)]
pub struct DecryptOutcome {
    pub target: PathBuf,
    pub result: Result<Restored>,
}

#[derive(Debug, Default)]
pub struct DecryptReport {
    pub items: Vec<DecryptOutcome>,
}

impl DecryptReport {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    pub(crate) fn push(&mut self, target: &Path, result: Result<Restored>) {
        self.items.push(DecryptOutcome { target: target.to_path_buf(), result });
    }
}
