use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Every file and symlink below `dir`, in a stable order.
///
/// Symlinks are listed, not followed, so they reach the builders as links.
pub(crate) fn expand_src_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("source directory '{}' does not exist", dir.display());
    }

    let mut files = Vec::new();
    for ent in WalkDir::new(dir).follow_links(false) {
        let ent = ent.with_context(|| format!("walking source directory '{}'", dir.display()))?;
        if ent.file_type().is_dir() {
            continue;
        }
        files.push(ent.into_path());
    }

    files.sort_by(|a, b| {
        let ra = a.strip_prefix(dir).unwrap_or(a).to_string_lossy();
        let rb = b.strip_prefix(dir).unwrap_or(b).to_string_lossy();
        ra.cmp(&rb)
    });
    Ok(files)
}

/// Append `extra` to `files`, skipping paths already present.
pub(crate) fn extend_unique(files: &mut Vec<PathBuf>, extra: impl IntoIterator<Item = PathBuf>) {
    for path in extra {
        if !files.contains(&path) {
            files.push(path);
        }
    }
}
