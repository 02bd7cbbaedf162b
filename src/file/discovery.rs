use std::path::Path;

use fast_glob::glob_match;
use walkdir::{DirEntry, WalkDir};

use crate::config::{ARTIFACT_EXTENSION, EXCLUDED_PATTERNS};
use crate::types::{Mode, Target};

/// Lists the entries of `root` the interactive picker should offer for `mode`.
///
/// Only the top level is listed: encryption accepts files and folders,
/// decryption only `.age` files. Hidden and excluded names are skipped.
pub fn discover(root: &Path, mode: Mode) -> Vec<Target> {
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| is_eligible(entry, mode))
        .filter_map(|entry| Target::inspect(entry.into_path()).ok())
        .collect()
}

fn is_eligible(entry: &DirEntry, mode: Mode) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') || is_excluded(&name) {
        return false;
    }

    let file_type = entry.file_type();
    let is_artifact = file_type.is_file() && name.ends_with(ARTIFACT_EXTENSION);
    match mode {
        Mode::Encrypt => (file_type.is_file() || file_type.is_dir()) && !is_artifact,
        Mode::Decrypt => is_artifact,
    }
}

pub fn is_excluded(name: &str) -> bool {
    EXCLUDED_PATTERNS.iter().any(|pattern| glob_match(pattern, name))
}
