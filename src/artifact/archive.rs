//! Single-archive output.
//!
//! Metadata is gathered concurrently but members are appended strictly in
//! layout order: generated files first, then user files in request order.
//! The archive is written to a `.partial` sibling and only renamed into
//! place once its trailer has been written, so a failed build never leaves
//! a truncated artifact at the destination.

use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::debug;

use super::codec::{open_sink, GENERATED_FILE_MODE};
use super::digest::sha256_file;
use super::filesystem::{ensure_parent, is_dir, remove_with_retry};
use super::{link_target, prepare, ArtifactDigest, PackContext, PackagedFunction, Prepared};
use crate::bootstrap::inject_bootstrap;
use crate::error::{PackError, PackResult};
use crate::layout::{plan_layout, ArtifactLayout, FileSet};
use crate::preflight::check_request;
use crate::request::{ArchiveFormat, PackagingRequest};
use crate::stat_cache::{FileKind, FileStat};

/// One archive member, fully resolved before writing starts.
#[derive(Debug)]
enum Member {
    Bytes { name: String, data: String, mode: u32 },
    File { name: String, source: PathBuf, stat: FileStat },
    Symlink { name: String, target: String, mode: u32 },
}

/// What the metadata pass learned about one layout entry.
enum Resolved {
    Rewrite,
    Regular(FileStat),
    Link { raw_target: PathBuf, mode: u32 },
    Directory,
}

/// Package `request` as a single archive at `request.destination`.
pub async fn build_archive(
    request: &PackagingRequest,
    format: ArchiveFormat,
    ctx: &PackContext,
) -> PackResult<PackagedFunction> {
    check_request(request, ctx.bootstrap_module.as_deref())?;
    let destination = request.destination.as_path();
    if is_dir(destination).await? {
        return Err(PackError::invalid_request(
            &request.name,
            format!(
                "archive destination '{}' is an existing directory",
                destination.display()
            ),
        ));
    }
    remove_with_retry(destination, ctx.cleanup_attempts).await?;
    ensure_parent(destination).await?;

    let prepared = prepare(request, ctx)?;
    let mut file_set = FileSet::from_request(request);
    inject_bootstrap(request, &mut file_set, ctx.bootstrap_module.as_deref())?;
    let layout = plan_layout(
        request,
        &file_set,
        prepared.decision.user_namespace,
        prepared.generated_names(),
    )?;

    let members = collect_members(&prepared, &layout, ctx).await?;

    let partial = partial_path(destination);
    remove_with_retry(&partial, ctx.cleanup_attempts).await?;
    let written = {
        let partial = partial.clone();
        tokio::task::spawn_blocking(move || write_members(format, &partial, &members)).await
    };
    if let Err(e) = written.map_err(PackError::from).and_then(|r| r) {
        if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
            debug!(path = %partial.display(), error = %cleanup, "partial archive already gone");
        }
        return Err(e);
    }
    tokio::fs::rename(&partial, destination)
        .await
        .map_err(|e| PackError::io(destination, e))?;

    let digest_path = destination.to_path_buf();
    let (sha256, size_bytes) =
        tokio::task::spawn_blocking(move || sha256_file(&digest_path)).await??;
    debug!(path = %destination.display(), %sha256, size_bytes, "archive written");

    Ok(PackagedFunction {
        name: request.name.clone(),
        path: destination.to_path_buf(),
        entry_filename: prepared.entry_filename,
        conflict: prepared.decision.conflict,
        user_namespace: prepared.decision.user_namespace.to_string(),
        digest: Some(ArtifactDigest { sha256, size_bytes }),
    })
}

/// `<destination>.partial`
fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("artifact"));
    name.push(".partial");
    destination.with_file_name(name)
}

async fn collect_members(
    prepared: &Prepared,
    layout: &ArtifactLayout,
    ctx: &PackContext,
) -> PackResult<Vec<Member>> {
    let permits = ctx.io_permits();
    let mut join_set = JoinSet::new();

    for (index, entry) in layout.entries.iter().enumerate() {
        if entry.rewrite.is_some() {
            continue;
        }
        let permit = Arc::clone(&permits)
            .acquire_owned()
            .await
            .map_err(|e| PackError::io(&entry.source, std::io::Error::other(e)))?;
        let source = entry.source.clone();
        let cache = Arc::clone(&ctx.stat_cache);
        join_set.spawn(async move {
            let _permit = permit;
            resolve(&source, &cache).await.map(|resolved| (index, resolved))
        });
    }

    let mut resolved: Vec<Option<Resolved>> = layout
        .entries
        .iter()
        .map(|entry| entry.rewrite.as_ref().map(|_| Resolved::Rewrite))
        .collect();
    while let Some(joined) = join_set.join_next().await {
        let (index, found) = joined??;
        resolved[index] = Some(found);
    }

    let mut members: Vec<Member> = prepared
        .generated_files()
        .map(|file| Member::Bytes {
            name: file.filename.clone(),
            data: file.contents.clone(),
            mode: GENERATED_FILE_MODE,
        })
        .collect();

    for (entry, found) in layout.entries.iter().zip(resolved) {
        let name = entry.destination.clone();
        let member = match found {
            Some(Resolved::Rewrite) => Member::Bytes {
                name,
                data: entry.rewrite.clone().unwrap_or_default(),
                mode: GENERATED_FILE_MODE,
            },
            Some(Resolved::Regular(stat)) => Member::File {
                name,
                source: entry.source.clone(),
                stat,
            },
            Some(Resolved::Link { raw_target, mode }) => {
                let target = link_target(&entry.source, &raw_target, &name, layout);
                Member::Symlink {
                    name,
                    target: target.to_string_lossy().replace('\\', "/"),
                    mode,
                }
            }
            Some(Resolved::Directory) => {
                debug!(source = %entry.source.display(), "skipping directory source");
                continue;
            }
            None => {
                return Err(PackError::archive(
                    &entry.source,
                    "metadata pass produced no result",
                ))
            }
        };
        members.push(member);
    }
    Ok(members)
}

async fn resolve(source: &Path, cache: &crate::stat_cache::StatCache) -> PackResult<Resolved> {
    let stat = cache.lstat(source).await?;
    Ok(match stat.kind {
        FileKind::Symlink => Resolved::Link {
            raw_target: tokio::fs::read_link(source)
                .await
                .map_err(|e| PackError::source_io(source, e))?,
            mode: stat.mode,
        },
        FileKind::Dir => Resolved::Directory,
        FileKind::File | FileKind::Other => Resolved::Regular(stat),
    })
}

fn write_members(format: ArchiveFormat, path: &Path, members: &[Member]) -> PackResult<()> {
    let file = File::create(path).map_err(|e| PackError::io(path, e))?;
    let mut sink = open_sink(format, file, path)?;
    for member in members {
        match member {
            Member::Bytes { name, data, mode } => sink.append_bytes(name, data.as_bytes(), *mode)?,
            Member::File { name, source, stat } => sink.append_file(name, source, stat)?,
            Member::Symlink { name, target, mode } => sink.append_symlink(name, target, *mode)?,
        }
    }
    sink.finish()
}
