//! Filesystem operations used while materializing an artifact.
//!
//! All operations are async and attach the offending path to every error.

use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::error::{PackError, PackResult};

/// Default number of attempts when clearing a destination folder.
pub const DEFAULT_CLEANUP_ATTEMPTS: u32 = 5;

const CLEANUP_BACKOFF: Duration = Duration::from_millis(50);

/// Remove whatever exists at `path`, retrying transient failures.
///
/// A missing path counts as success. Each retry waits a little longer than
/// the previous one (linear backoff).
pub async fn remove_with_retry(path: &Path, attempts: u32) -> PackResult<()> {
    retry_cleanup(path, attempts, || remove_path(path)).await
}

async fn retry_cleanup<F, Fut>(path: &Path, attempts: u32, mut remove: F) -> PackResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match remove().await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) if attempt >= attempts => {
                return Err(PackError::CleanupFailed {
                    path: path.to_path_buf(),
                    attempts,
                    source: e,
                })
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    attempt,
                    error = %e,
                    "removing destination failed, retrying"
                );
                tokio::time::sleep(CLEANUP_BACKOFF * attempt).await;
                attempt += 1;
            }
        }
    }
}

async fn remove_path(path: &Path) -> io::Result<()> {
    let md = tokio::fs::symlink_metadata(path).await?;
    if md.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

/// Whether a directory (not a symlink to one) exists at `path`.
pub async fn is_dir(path: &Path) -> PackResult<bool> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(md) => Ok(md.is_dir()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PackError::io(path, e)),
    }
}

/// Destroy any existing folder at `path` and create it empty.
pub async fn recreate_dir(path: &Path, attempts: u32) -> PackResult<()> {
    remove_with_retry(path, attempts).await?;
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| PackError::io(path, e))
}

pub async fn ensure_parent(path: &Path) -> PackResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PackError::io(parent, e))?;
    }
    Ok(())
}

/// Write a file with given content, creating parent directories.
pub async fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> PackResult<()> {
    ensure_parent(path).await?;
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| PackError::io(path, e))
}

/// Copy a regular file, keeping its permissions.
pub async fn copy_file(src: &Path, dst: &Path) -> PackResult<()> {
    ensure_parent(dst).await?;
    tokio::fs::copy(src, dst)
        .await
        .map(|_| ())
        .map_err(|e| PackError::source_io(src, e))
}

/// Create a symlink at `link` pointing at `target`.
///
/// An existing file or link at `link` is replaced.
pub async fn create_symlink(target: &Path, link: &Path) -> PackResult<()> {
    ensure_parent(link).await?;
    match tokio::fs::symlink_metadata(link).await {
        Ok(_) => tokio::fs::remove_file(link)
            .await
            .map_err(|e| PackError::io(link, e))?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(PackError::io(link, e)),
    }
    symlink(target, link)
        .await
        .map_err(|e| PackError::io(link, e))
}

#[cfg(unix)]
async fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlink preservation requires a unix host",
    ))
}
