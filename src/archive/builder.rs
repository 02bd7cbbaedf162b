//! Staging and compression of encryption inputs.
//!
//! Every build owns two private temporary directories: the staging tree that
//! receives copies of the targets, and the directory holding the compressed
//! archive. The staging tree is removed when [`ArchiveBuilder::build`]
//! returns; the archive directory lives exactly as long as the returned
//! [`Archive`].

use std::ffi::{OsStr, OsString};
use std::fs::{self, FileTimes, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hashbrown::HashSet;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{ARCHIVE_EXTENSION, STAGING_PREFIX};
use crate::error::{Error, Result};
use crate::tool::Tool;
use crate::types::Target;

/// Compressed plaintext archive, deleted together with its private directory on drop.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    size: u64,
    staged: usize,
    scrubbed: usize,
    _dir: TempDir,
}

impl Archive {
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of top-level entries packed.
    #[inline]
    pub fn staged(&self) -> usize {
        self.staged
    }

    /// Files the metadata scrubber reported as cleaned.
    #[inline]
    pub fn scrubbed(&self) -> usize {
        self.scrubbed
    }
}

#[derive(Clone, Debug)]
struct Scrubber {
    tool: Tool,
    timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct ArchiveBuilder {
    tar: Tool,
    scrubber: Option<Scrubber>,
}

impl ArchiveBuilder {
    pub fn new(tar: Tool) -> Self {
        Self { tar, scrubber: None }
    }

    /// Enables in-place metadata scrubbing of every staged regular file.
    #[must_use]
    pub fn with_scrubber(mut self, mat2: Tool, timeout: Duration) -> Self {
        self.scrubber = Some(Scrubber { tool: mat2, timeout });
        self
    }

    /// Packs `targets` into `<name>.tar.gz` inside a private directory.
    pub async fn build(&self, targets: &[Target], name: &OsStr) -> Result<Archive> {
        if targets.is_empty() {
            return Err(Error::validation("nothing to encrypt"));
        }
        let names = unique_basenames(targets)?;

        let staging = tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir().map_err(|e| Error::io("cannot create staging directory", e))?;
        debug!(staging = %staging.path().display(), targets = targets.len(), "staging targets");

        for (target, name) in targets.iter().zip(&names) {
            let dest = staging.path().join(name);
            if target.is_dir() {
                copy_tree(target.path(), &dest)?;
            } else {
                copy_file(target.path(), &dest)?;
            }
        }

        let scrubbed = match &self.scrubber {
            Some(scrubber) => scrubber.scrub_tree(staging.path()).await,
            None => 0,
        };

        let out_dir = tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir().map_err(|e| Error::io("cannot create archive directory", e))?;
        let mut file_name = name.to_os_string();
        file_name.push(ARCHIVE_EXTENSION);
        let path = out_dir.path().join(file_name);

        let mut args: Vec<OsString> = vec!["-czf".into(), path.clone().into_os_string(), "-C".into(), staging.path().as_os_str().to_owned(), "--".into()];
        args.extend(names);
        self.tar.run(&args, None).await?.ensure_success(&self.tar)?;

        let size = fs::metadata(&path).map_err(|e| Error::io_at("archive missing", &path, e))?.len();
        info!(archive = %path.display(), size, staged = targets.len(), scrubbed, "archive created");

        Ok(Archive { path, size, staged: targets.len(), scrubbed, _dir: out_dir })
    }
}

impl Scrubber {
    /// Scrubs every regular file under `root`, returning how many were cleaned.
    async fn scrub_tree(&self, root: &Path) -> usize {
        let files: Vec<PathBuf> = WalkDir::new(root).follow_links(false).into_iter().filter_map(std::result::Result::ok).filter(|e| e.file_type().is_file()).map(walkdir::DirEntry::into_path).collect();

        let mut cleaned = 0;
        for file in files {
            let args: [&OsStr; 4] = ["--inplace".as_ref(), "--unknown-members".as_ref(), "omit".as_ref(), file.as_os_str()];
            match self.tool.run(args, Some(self.timeout)).await {
                Ok(captured) => match captured.status.code() {
                    Some(0) => cleaned += 1,
                    Some(1) => debug!(path = %file.display(), "format not supported by scrubber, kept as copied"),
                    code => warn!(path = %file.display(), code, stderr = %captured.stderr_lossy(), "metadata scrub failed"),
                },
                Err(e) => warn!(path = %file.display(), error = %e, "metadata scrub skipped"),
            }
        }

        cleaned
    }
}

fn unique_basenames(targets: &[Target]) -> Result<Vec<OsString>> {
    let mut seen = HashSet::with_capacity(targets.len());
    let mut names = Vec::with_capacity(targets.len());

    for target in targets {
        let name = target.basename()?;
        if !seen.insert(name) {
            return Err(Error::validation(format!("two selected items share the name {}", name.to_string_lossy())));
        }
        names.push(name.to_os_string());
    }

    Ok(names)
}

/// Copies contents, permissions and timestamps.
fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    fs::copy(src, dest).map_err(|e| Error::io_at("cannot copy", src, e))?;
    copy_times(src, dest);
    Ok(())
}

fn copy_times(src: &Path, dest: &Path) {
    let Ok(meta) = fs::metadata(src) else { return };
    let mut times = FileTimes::new();
    if let Ok(modified) = meta.modified() {
        times = times.set_modified(modified);
    }
    if let Ok(accessed) = meta.accessed() {
        times = times.set_accessed(accessed);
    }
    if let Err(e) = fs::File::options().write(true).open(dest).and_then(|f| f.set_times(times)) {
        debug!(path = %dest.display(), error = %e, "could not preserve timestamps");
    }
}

/// Owner bits every staged directory keeps so the staging tree can always be removed.
const STAGED_DIR_OWNER: u32 = 0o700;

/// Recursive copy that recreates symlinks instead of following them.
///
/// Directory permissions are applied after their contents are written so a
/// read-only source directory can still be populated. Staged directories
/// always stay owner-writable.
fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    let mut directories: Vec<(PathBuf, Permissions)> = Vec::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            Error::io_at("cannot read", &path, e.into())
        })?;
        let relative = entry.path().strip_prefix(src).map_err(|_| Error::validation(format!("unexpected entry {}", entry.path().display())))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io_at("cannot create", &target, e))?;
            if let Ok(meta) = entry.metadata() {
                directories.push((target, Permissions::from_mode(meta.permissions().mode() | STAGED_DIR_OWNER)));
            }
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| Error::io_at("cannot read link", entry.path(), e))?;
            if let Err(e) = std::os::unix::fs::symlink(&link, &target) {
                warn!(path = %entry.path().display(), error = %e, "skipping symlink");
            }
        } else if file_type.is_file() {
            copy_file(entry.path(), &target)?;
        } else {
            debug!(path = %entry.path().display(), "skipping special file");
        }
    }

    for (dir, permissions) in directories.into_iter().rev() {
        if let Err(e) = fs::set_permissions(&dir, permissions) {
            debug!(path = %dir.display(), error = %e, "could not preserve directory permissions");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::extractor::ArchiveExtractor;

    fn fixture(dir: &Path) -> Vec<Target> {
        let report = dir.join("report.pdf");
        let photos = dir.join("photos");
        fs::write(&report, b"%PDF-1.7 quarterly").unwrap();
        fs::create_dir_all(photos.join("2024")).unwrap();
        fs::write(photos.join("2024").join("beach.jpg"), b"jpeg bytes").unwrap();
        fs::write(photos.join("notes.txt"), b"captions").unwrap();
        std::os::unix::fs::symlink("2024/beach.jpg", photos.join("latest")).unwrap();
        std::os::unix::fs::symlink("missing.jpg", photos.join("dangling")).unwrap();

        vec![Target::inspect(report).unwrap(), Target::inspect(photos).unwrap()]
    }

    #[tokio::test]
    async fn test_build_packs_targets_by_basename() {
        let src = tempfile::tempdir().unwrap();
        let targets = fixture(src.path());

        let archive = ArchiveBuilder::new(Tool::new("tar")).build(&targets, "bundle".as_ref()).await.unwrap();
        assert!(archive.path().ends_with("bundle.tar.gz"));
        assert!(archive.size() > 0);
        assert_eq!(archive.staged(), 2);

        let members = ArchiveExtractor::new(Tool::new("tar")).list_members(archive.path()).await.unwrap();
        let members: Vec<&str> = members.iter().map(|m| m.trim_end_matches('/')).collect();
        for expected in ["report.pdf", "photos", "photos/2024/beach.jpg", "photos/latest", "photos/dangling"] {
            assert!(members.contains(&expected), "missing {expected} in {members:?}");
        }
    }

    #[tokio::test]
    async fn test_archive_and_staging_removed_on_drop() {
        let src = tempfile::tempdir().unwrap();
        let targets = fixture(src.path());

        let archive = ArchiveBuilder::new(Tool::new("tar")).build(&targets[..1], "report.pdf".as_ref()).await.unwrap();
        let path = archive.path().to_path_buf();
        let dir = path.parent().unwrap().to_path_buf();
        assert!(path.exists());

        drop(archive);
        assert!(!path.exists());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_duplicate_basenames_rejected() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("a")).unwrap();
        fs::create_dir_all(src.path().join("b")).unwrap();
        fs::write(src.path().join("a").join("x.txt"), b"1").unwrap();
        fs::write(src.path().join("b").join("x.txt"), b"2").unwrap();
        let targets = vec![Target::inspect(src.path().join("a/x.txt")).unwrap(), Target::inspect(src.path().join("b/x.txt")).unwrap()];

        let err = ArchiveBuilder::new(Tool::new("tar")).build(&targets, "bundle".as_ref()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_scrub_counts_cleaned_and_tolerates_failures() {
        let src = tempfile::tempdir().unwrap();
        let targets = fixture(src.path());
        let script = src.path().join("fake-mat2.sh");
        fs::write(&script, "case \"$4\" in\n  *.jpg) exit 0 ;;\n  *.pdf) exit 0 ;;\n  *.txt) exit 1 ;;\n  *) exit 7 ;;\nesac\n").unwrap();

        let builder = ArchiveBuilder::new(Tool::new("tar")).with_scrubber(Tool::new("sh").with_args([script.as_os_str()]), Duration::from_secs(5));
        let archive = builder.build(&targets, "bundle".as_ref()).await.unwrap();
        assert_eq!(archive.scrubbed(), 2);
    }

    #[tokio::test]
    async fn test_scrub_timeout_skips_file() {
        let src = tempfile::tempdir().unwrap();
        let targets = fixture(src.path());
        let script = src.path().join("slow-mat2.sh");
        fs::write(&script, "exec sleep 5\n").unwrap();

        let builder = ArchiveBuilder::new(Tool::new("tar")).with_scrubber(Tool::new("sh").with_args([script.as_os_str()]), Duration::from_millis(100));
        let archive = builder.build(&targets[..1], "report.pdf".as_ref()).await.unwrap();
        assert_eq!(archive.scrubbed(), 0);
    }

    #[test]
    fn test_copy_tree_preserves_modes_and_links() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let tree = src.path().join("tree");
        fs::create_dir(&tree).unwrap();
        fs::write(tree.join("run.sh"), b"#!/bin/sh\n").unwrap();
        fs::set_permissions(tree.join("run.sh"), Permissions::from_mode(0o750)).unwrap();
        std::os::unix::fs::symlink("/nonexistent/target", tree.join("broken")).unwrap();

        copy_tree(&tree, &dest.path().join("tree")).unwrap();

        let copied = dest.path().join("tree");
        assert_eq!(fs::metadata(copied.join("run.sh")).unwrap().permissions().mode() & 0o777, 0o750);
        assert_eq!(fs::read_link(copied.join("broken")).unwrap(), PathBuf::from("/nonexistent/target"));
    }

    #[test]
    fn test_read_only_subdirectory_does_not_pin_staging() {
        let src = tempfile::tempdir().unwrap();
        let locked = src.path().join("album").join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("secret.txt"), b"plaintext").unwrap();
        fs::set_permissions(&locked, Permissions::from_mode(0o555)).unwrap();

        let staging = tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir().unwrap();
        copy_tree(&src.path().join("album"), &staging.path().join("album")).unwrap();

        let staged = staging.path().join("album").join("locked");
        assert_eq!(fs::metadata(&staged).unwrap().permissions().mode() & 0o777, 0o755);
        assert_eq!(fs::read(staged.join("secret.txt")).unwrap(), b"plaintext");

        let root = staging.path().to_path_buf();
        drop(staging);
        assert!(!root.exists());

        fs::set_permissions(&locked, Permissions::from_mode(0o755)).unwrap();
    }
}
