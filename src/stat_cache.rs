//! Build-scoped cache of symlink-aware file metadata.
//!
//! One [`StatCache`] is created per build and shared by reference across
//! every function packaged in it. Sources are immutable for the duration of
//! a build, so entries are never invalidated.
//!
//! Concurrent lookups of the same path may both reach the underlying
//! [`StatSource`]; they converge on the same value.

use std::collections::HashMap;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{PackError, PackResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    Other,
}

/// The subset of metadata the packager uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub kind: FileKind,
    pub len: u64,
    /// Permission bits (`0o777` mask).
    pub mode: u32,
}

impl FileStat {
    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    pub fn from_metadata(md: &Metadata) -> Self {
        let file_type = md.file_type();
        let kind = if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Dir
        } else if file_type.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        };

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            md.permissions().mode() & 0o777
        };
        #[cfg(not(unix))]
        let mode = match kind {
            FileKind::Dir => 0o755,
            FileKind::Symlink => 0o777,
            _ => 0o644,
        };

        Self {
            kind,
            len: md.len(),
            mode,
        }
    }
}

/// Where metadata comes from. Never follows symlinks.
#[async_trait]
pub trait StatSource: Send + Sync {
    async fn lstat(&self, path: &Path) -> io::Result<FileStat>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStatSource;

#[async_trait]
impl StatSource for FsStatSource {
    async fn lstat(&self, path: &Path) -> io::Result<FileStat> {
        let md = tokio::fs::symlink_metadata(path).await?;
        Ok(FileStat::from_metadata(&md))
    }
}

pub struct StatCache {
    source: Arc<dyn StatSource>,
    entries: RwLock<HashMap<PathBuf, FileStat>>,
}

impl std::fmt::Debug for StatCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl Default for StatCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StatCache {
    /// Cache backed by the real filesystem.
    pub fn new() -> Self {
        Self::with_source(Arc::new(FsStatSource))
    }

    pub fn with_source(source: Arc<dyn StatSource>) -> Self {
        Self {
            source,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Memoized `lstat`. Failures are not cached.
    pub async fn lstat(&self, path: &Path) -> PackResult<FileStat> {
        if let Some(hit) = self.get(path) {
            return Ok(hit);
        }

        let stat = self
            .source
            .lstat(path)
            .await
            .map_err(|e| PackError::source_io(path, e))?;

        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(path.to_path_buf())
            .or_insert(stat);
        Ok(stat)
    }

    pub fn get(&self, path: &Path) -> Option<FileStat> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(path)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
