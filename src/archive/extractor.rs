use std::fs;
use std::path::{Component, Path};

use hashbrown::HashSet;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::tool::Tool;

/// Lists, validates and only then unpacks compressed tar archives.
#[derive(Clone, Debug)]
pub struct ArchiveExtractor {
    tar: Tool,
}

impl ArchiveExtractor {
    pub fn new(tar: Tool) -> Self {
        Self { tar }
    }

    /// Member names as reported by the archiver, without extracting anything.
    pub async fn list_members(&self, archive: &Path) -> Result<Vec<String>> {
        let captured = self.tar.run(["-tzf".as_ref(), archive.as_os_str()], None).await?.ensure_success(&self.tar)?;
        Ok(String::from_utf8_lossy(&captured.stdout).lines().filter(|line| !line.is_empty()).map(str::to_owned).collect())
    }

    /// Lists `archive` and fails unless every member passes [`check_members`].
    pub async fn checked_members(&self, archive: &Path) -> Result<Vec<String>> {
        let members = self.list_members(archive).await?;
        check_members(&members)?;
        Ok(members)
    }

    /// Unpacks `archive` into `dest`. Only call with an archive whose members were checked.
    pub async fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        self.tar.run(["-xzf".as_ref(), archive.as_os_str(), "-C".as_ref(), dest.as_os_str()], None).await?.ensure_success(&self.tar)?;
        Ok(())
    }

    /// Extracts `archive` into `dest` after every member passed [`check_members`].
    ///
    /// Returns the number of members. Nothing is written when any member is unsafe.
    pub async fn safe_extract(&self, archive: &Path, dest: &Path) -> Result<usize> {
        let members = self.checked_members(archive).await?;
        self.extract(archive, dest).await?;
        info!(archive = %archive.display(), dest = %dest.display(), members = members.len(), "archive extracted");

        Ok(members.len())
    }
}

/// Top-level names among `members` that already exist in `dest`, in archive order.
pub fn existing_entries<S: AsRef<str>>(members: &[S], dest: &Path) -> Vec<String> {
    let mut seen = HashSet::new();
    members
        .iter()
        .filter_map(|member| Path::new(member.as_ref()).components().find_map(|c| if let Component::Normal(name) = c { Some(name) } else { None }))
        .filter(|name| seen.insert(name.to_os_string()))
        .filter(|name| fs::symlink_metadata(dest.join(name)).is_ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// Rejects the whole list if any member is absolute or climbs out with `..`.
pub fn check_members<S: AsRef<str>>(members: &[S]) -> Result<()> {
    for member in members {
        let member = member.as_ref();
        let path = Path::new(member);
        if path.is_absolute() || path.components().any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))) {
            warn!(member, "unsafe archive member");
            return Err(Error::validation(format!("unsafe path in archive: {member}")));
        }
    }
    Ok(())
}
