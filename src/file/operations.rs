use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use crate::config::{AGE_MAGIC, ARTIFACT_EXTENSION, BUNDLE_PREFIX, BUNDLE_TIMESTAMP, DECRYPTED_SUFFIX, GZIP_MAGIC, SHRED_PASSES, SIGNATURE_WINDOW, TAR_BLOCK, TAR_MAGIC, TAR_MAGIC_OFFSET};
use crate::error::{Error, ItemError, Result};
use crate::file::validation::PathGuard;
use crate::tool::Tool;
use crate::types::{Removal, Target};

fn read_prefix(path: &Path, limit: usize) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| Error::io_at("cannot open", path, e))?;
    let mut prefix = Vec::with_capacity(limit);
    file.take(limit as u64).read_to_end(&mut prefix).map_err(|e| Error::io_at("cannot read", path, e))?;
    Ok(prefix)
}

/// Checks that the first bytes of `path` carry the age header marker.
pub fn verify_signature(path: &Path) -> Result<()> {
    let header = read_prefix(path, SIGNATURE_WINDOW)?;
    if header.windows(AGE_MAGIC.len()).any(|w| w == AGE_MAGIC) {
        return Ok(());
    }

    warn!(path = %path.display(), "missing age header");
    Err(Error::validation(format!("not a valid .age file: {}", file_label(path))))
}

/// Whether `path` starts with a gzip header.
pub fn is_gzip(path: &Path) -> Result<bool> {
    Ok(read_prefix(path, GZIP_MAGIC.len())? == GZIP_MAGIC)
}

/// Whether `path` is a gzip stream whose first decompressed block is a tar header.
///
/// A plain `.gz` file is not an archive even though it shares the gzip magic.
pub fn is_tar_gzip(path: &Path) -> Result<bool> {
    if !is_gzip(path)? {
        return Ok(false);
    }

    let file = File::open(path).map_err(|e| Error::io_at("cannot open", path, e))?;
    let mut header = Vec::with_capacity(TAR_BLOCK);
    if let Err(e) = GzDecoder::new(file).take(TAR_BLOCK as u64).read_to_end(&mut header) {
        debug!(path = %path.display(), error = %e, "gzip stream could not be decoded");
        return Ok(false);
    }

    Ok(header.get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()) == Some(TAR_MAGIC))
}

/// Bundle name for a selection: the single target's basename or a timestamped generic name.
pub fn bundle_name(targets: &[Target], now: DateTime<Local>) -> Result<OsString> {
    match targets {
        [single] => Ok(single.basename()?.to_os_string()),
        _ => Ok(OsString::from(format!("{BUNDLE_PREFIX}{}", now.format(BUNDLE_TIMESTAMP)))),
    }
}

/// `<dir>/<name>.age`
pub fn artifact_path(dir: &Path, name: &OsStr) -> PathBuf {
    let mut file_name = name.to_os_string();
    file_name.push(ARTIFACT_EXTENSION);
    dir.join(file_name)
}

/// Strips `.age`, or appends `.decrypted` when the name has no such suffix.
pub fn decrypted_path(artifact: &Path) -> PathBuf {
    let bytes = artifact.as_os_str().as_bytes();
    match bytes.strip_suffix(ARTIFACT_EXTENSION.as_bytes()) {
        Some(stripped) if !stripped.is_empty() && !stripped.ends_with(b"/") => PathBuf::from(OsStr::from_bytes(stripped)),
        _ => {
            let mut path = artifact.as_os_str().to_os_string();
            path.push(DECRYPTED_SUFFIX);
            PathBuf::from(path)
        }
    }
}

pub fn file_label(path: &Path) -> String {
    path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

/// Removes an output file on drop unless [`PartialOutput::keep`] was called.
#[derive(Debug)]
pub struct PartialOutput {
    path: PathBuf,
    armed: bool,
}

impl PartialOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), armed: true }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed partial output"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove partial output"),
        }
    }
}

/// Overwrites a file with the secure delete tool, falling back to a plain unlink.
pub async fn shred_file(shred: &Tool, path: &Path) -> Removal {
    let passes = SHRED_PASSES.to_string();
    let args: [&OsStr; 8] = ["-v".as_ref(), "-f".as_ref(), "-z".as_ref(), "-u".as_ref(), "-n".as_ref(), passes.as_ref(), "--".as_ref(), path.as_os_str()];
    let outcome = shred.run(args, None).await;

    match outcome.and_then(|captured| captured.ensure_success(shred)) {
        Ok(_) if !path.exists() => {
            info!(path = %path.display(), "original shredded");
            Removal::Shredded
        }
        Ok(_) => unlink(path, "shred left the file in place"),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "secure delete unavailable, falling back to unlink");
            unlink(path, "fallback")
        }
    }
}

fn unlink(path: &Path, reason: &str) -> Removal {
    match fs::remove_file(path) {
        Ok(()) => {
            warn!(path = %path.display(), reason, "original removed without overwriting");
            Removal::Unlinked
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "fallback delete also failed");
            Removal::Failed(ItemError { path: path.to_path_buf(), error: Error::io_at("cannot remove", path, e) })
        }
    }
}

/// Removes an original target after validating it with `guard`.
pub async fn remove_original(shred: &Tool, guard: &PathGuard, target: &Target) -> Removal {
    let path = target.path();
    if let Err(error) = guard.resolve(path) {
        return Removal::Failed(ItemError { path: path.to_path_buf(), error });
    }

    if !target.is_dir() {
        return shred_file(shred, path).await;
    }

    match fs::remove_dir_all(path) {
        Ok(()) => {
            info!(path = %path.display(), "original folder removed");
            Removal::Tree
        }
        Err(e) => Removal::Failed(ItemError { path: path.to_path_buf(), error: Error::io_at("cannot remove folder", path, e) }),
    }
}
