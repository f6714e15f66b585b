//! Expanded-directory output.
//!
//! Two passes: every regular file and rewrite is materialized on a bounded
//! worker pool, symlinks are only recorded. Once all of those writes have
//! completed, the recorded symlinks are created, so a link never exists
//! before its target.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::debug;

use super::filesystem::{copy_file, create_symlink, recreate_dir, write_file};
use super::{link_target, prepare, PackContext, PackagedFunction};
use crate::bootstrap::inject_bootstrap;
use crate::entry::SynthesizedFile;
use crate::error::{PackError, PackResult};
use crate::layout::{plan_layout, ArtifactLayout, FileSet, LayoutEntry};
use crate::preflight::check_request;
use crate::request::PackagingRequest;
use crate::stat_cache::{FileKind, StatCache};

/// A symlink found during the copy pass, created in the link pass.
#[derive(Debug)]
struct DeferredLink {
    source: PathBuf,
    destination: String,
    raw_target: PathBuf,
}

enum Outcome {
    Written,
    Deferred(DeferredLink),
}

/// Materialize `request` as a folder at `request.destination`.
///
/// Any existing folder at the destination is destroyed first, after the
/// request has passed preflight.
pub async fn build_directory(
    request: &PackagingRequest,
    ctx: &PackContext,
) -> PackResult<PackagedFunction> {
    check_request(request, ctx.bootstrap_module.as_deref())?;
    let prepared = prepare(request, ctx)?;
    let root = request.destination.as_path();

    recreate_dir(root, ctx.cleanup_attempts).await?;

    tokio::try_join!(
        write_generated(root, prepared.entry.as_ref()),
        write_generated(root, prepared.telemetry.as_ref()),
    )?;

    let mut file_set = FileSet::from_request(request);
    inject_bootstrap(request, &mut file_set, ctx.bootstrap_module.as_deref())?;
    let layout = plan_layout(
        request,
        &file_set,
        prepared.decision.user_namespace,
        prepared.generated_names(),
    )?;

    let deferred = copy_pass(&layout, root, ctx).await?;
    link_pass(deferred, &layout, root).await?;

    Ok(PackagedFunction {
        name: request.name.clone(),
        path: root.to_path_buf(),
        entry_filename: prepared.entry_filename,
        conflict: prepared.decision.conflict,
        user_namespace: prepared.decision.user_namespace.to_string(),
        digest: None,
    })
}

async fn write_generated(root: &Path, file: Option<&SynthesizedFile>) -> PackResult<()> {
    match file {
        Some(file) => write_file(&root.join(&file.filename), &file.contents).await,
        None => Ok(()),
    }
}

async fn copy_pass(
    layout: &ArtifactLayout,
    root: &Path,
    ctx: &PackContext,
) -> PackResult<Vec<DeferredLink>> {
    let permits = ctx.io_permits();
    let mut join_set = JoinSet::new();

    for entry in &layout.entries {
        let permit = Arc::clone(&permits)
            .acquire_owned()
            .await
            .map_err(|e| PackError::io(root, std::io::Error::other(e)))?;
        let entry = entry.clone();
        let dst = root.join(&entry.destination);
        let cache = Arc::clone(&ctx.stat_cache);
        join_set.spawn(async move {
            let _permit = permit;
            materialize(entry, dst, &cache).await
        });
    }

    let mut deferred = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        if let Outcome::Deferred(link) = joined?? {
            deferred.push(link);
        }
    }
    deferred.sort_by(|a, b| a.destination.cmp(&b.destination));
    Ok(deferred)
}

async fn materialize(
    entry: LayoutEntry,
    dst: PathBuf,
    cache: &StatCache,
) -> PackResult<Outcome> {
    if let Some(contents) = &entry.rewrite {
        debug!(source = %entry.source.display(), destination = %entry.destination, "rewrite");
        write_file(&dst, contents).await?;
        return Ok(Outcome::Written);
    }

    let stat = cache.lstat(&entry.source).await?;
    match stat.kind {
        FileKind::Symlink => {
            let raw_target = tokio::fs::read_link(&entry.source)
                .await
                .map_err(|e| PackError::source_io(&entry.source, e))?;
            debug!(
                source = %entry.source.display(),
                destination = %entry.destination,
                "defer symlink"
            );
            Ok(Outcome::Deferred(DeferredLink {
                source: entry.source,
                destination: entry.destination,
                raw_target,
            }))
        }
        FileKind::Dir => {
            tokio::fs::create_dir_all(&dst)
                .await
                .map_err(|e| PackError::io(&dst, e))?;
            Ok(Outcome::Written)
        }
        FileKind::File | FileKind::Other => {
            debug!(source = %entry.source.display(), destination = %entry.destination, "copy");
            copy_file(&entry.source, &dst).await?;
            Ok(Outcome::Written)
        }
    }
}

async fn link_pass(
    deferred: Vec<DeferredLink>,
    layout: &ArtifactLayout,
    root: &Path,
) -> PackResult<()> {
    for link in deferred {
        let target = link_target(&link.source, &link.raw_target, &link.destination, layout);
        create_symlink(&target, &root.join(&link.destination)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BOOTSTRAP_FILENAME, TELEMETRY_FILENAME, USER_NAMESPACE};
    use crate::request::{FeatureFlags, ModuleFormat, RuntimeApiVersion};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        src: PathBuf,
        out: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("functions");
        fs::create_dir_all(src.join("hello/lib")).unwrap();
        fs::write(src.join("hello/index.js"), "exports.handler = require('./lib/util')").unwrap();
        fs::write(src.join("hello/lib/util.js"), "module.exports = 42").unwrap();
        let out = temp.path().join("out/hello");
        Fixture {
            _temp: temp,
            src,
            out,
        }
    }

    fn request(fx: &Fixture) -> PackagingRequest {
        PackagingRequest::new("hello", &fx.src, fx.src.join("hello/index.js"), &fx.out)
            .with_src_files([fx.src.join("hello/index.js"), fx.src.join("hello/lib/util.js")])
    }

    #[tokio::test]
    async fn writes_entry_and_copies_sources() {
        let fx = fixture();
        let packaged = build_directory(&request(&fx), &PackContext::new()).await.unwrap();

        assert_eq!(packaged.entry_filename, "hello.js");
        assert!(!packaged.conflict);
        assert_eq!(
            fs::read_to_string(fx.out.join("hello.js")).unwrap(),
            "module.exports = require('./hello/index.js')\n"
        );
        assert_eq!(
            fs::read_to_string(fx.out.join("hello/lib/util.js")).unwrap(),
            "module.exports = 42"
        );
    }

    #[tokio::test]
    async fn previous_output_is_destroyed() {
        let fx = fixture();
        fs::create_dir_all(&fx.out).unwrap();
        fs::write(fx.out.join("stale.js"), "old").unwrap();

        build_directory(&request(&fx), &PackContext::new()).await.unwrap();
        assert!(!fx.out.join("stale.js").exists());
    }

    #[tokio::test]
    async fn rewrite_wins_over_disk_content() {
        let fx = fixture();
        let req = request(&fx).with_rewrite(fx.src.join("hello/lib/util.js"), "module.exports = 7");
        build_directory(&req, &PackContext::new()).await.unwrap();
        assert_eq!(
            fs::read_to_string(fx.out.join("hello/lib/util.js")).unwrap(),
            "module.exports = 7"
        );
    }

    #[tokio::test]
    async fn rewrite_never_touches_missing_file() {
        let fx = fixture();
        let virtual_file = fx.src.join("hello/generated.json");
        let req = request(&fx)
            .with_src_files([fx.src.join("hello/index.js"), virtual_file.clone()])
            .with_rewrite(&virtual_file, "{}");
        build_directory(&req, &PackContext::new()).await.unwrap();
        assert_eq!(
            fs::read_to_string(fx.out.join("hello/generated.json")).unwrap(),
            "{}"
        );
    }

    #[tokio::test]
    async fn telemetry_written_next_to_entry() {
        let fx = fixture();
        let req = request(&fx).with_feature_flags(FeatureFlags {
            telemetry_loader: true,
            ..Default::default()
        });
        build_directory(&req, &PackContext::new()).await.unwrap();
        assert!(fx.out.join(TELEMETRY_FILENAME).is_file());
        assert!(fx.out.join("hello.js").is_file());
    }

    #[tokio::test]
    async fn conflicting_user_file_moves_everything_under_namespace() {
        let fx = fixture();
        fs::write(fx.src.join("hello.js"), "user code").unwrap();
        let req = request(&fx).with_src_files([
            fx.src.join("hello/index.js"),
            fx.src.join("hello/lib/util.js"),
            fx.src.join("hello.js"),
        ]);

        let packaged = build_directory(&req, &PackContext::new()).await.unwrap();

        assert!(packaged.conflict);
        assert_eq!(packaged.user_namespace, USER_NAMESPACE);
        assert_eq!(
            fs::read_to_string(fx.out.join("hello.js")).unwrap(),
            "module.exports = require('./___fn-user-code/hello/index.js')\n"
        );
        assert_eq!(
            fs::read_to_string(fx.out.join("___fn-user-code/hello.js")).unwrap(),
            "user code"
        );
        assert!(fx.out.join("___fn-user-code/hello/lib/util.js").is_file());
    }

    #[tokio::test]
    async fn main_file_named_like_entry_is_not_overwritten() {
        let fx = fixture();
        fs::write(fx.src.join("hello.js"), "exports.handler = 1").unwrap();
        let req = PackagingRequest::new("hello", &fx.src, fx.src.join("hello.js"), &fx.out);

        let packaged = build_directory(&req, &PackContext::new()).await.unwrap();
        assert_eq!(packaged.entry_filename, "hello.js");
        assert_eq!(
            fs::read_to_string(fx.out.join("hello.js")).unwrap(),
            "exports.handler = 1"
        );
    }

    #[tokio::test]
    async fn v2_gets_one_bootstrap_and_one_entry() {
        let fx = fixture();
        let boot = fx.src.join("../runtime/bootstrap.mjs");
        fs::create_dir_all(boot.parent().unwrap()).unwrap();
        fs::write(&boot, "export const getHandler = (f) => f.handler").unwrap();

        let req = request(&fx)
            .with_module_format(ModuleFormat::Esm)
            .with_runtime_api_version(RuntimeApiVersion::V2);
        let ctx = PackContext::new().with_bootstrap_module(&boot);
        let packaged = build_directory(&req, &ctx).await.unwrap();

        assert_eq!(packaged.entry_filename, "___fn-entry-point.mjs");
        let roots: Vec<String> = fs::read_dir(&fx.out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(roots.iter().filter(|n| *n == BOOTSTRAP_FILENAME).count(), 1);
        assert_eq!(
            roots
                .iter()
                .filter(|n| n.starts_with("___fn-entry-point"))
                .count(),
            1
        );
        assert_eq!(
            fs::read_to_string(fx.out.join(BOOTSTRAP_FILENAME)).unwrap(),
            "export const getHandler = (f) => f.handler"
        );
    }

    #[tokio::test]
    async fn v2_main_at_base_keeps_its_name() {
        let fx = fixture();
        fs::write(fx.src.join("hello.mjs"), "export const handler = () => 2").unwrap();
        let boot = fx.src.join("../runtime/bootstrap.mjs");
        fs::create_dir_all(boot.parent().unwrap()).unwrap();
        fs::write(&boot, "export const getHandler = (f) => f.handler").unwrap();

        let req = PackagingRequest::new("hello", &fx.src, fx.src.join("hello.mjs"), &fx.out)
            .with_src_files([fx.src.join("hello.mjs"), fx.src.join("hello/lib/util.js")])
            .with_module_format(ModuleFormat::Esm)
            .with_runtime_api_version(RuntimeApiVersion::V2);
        let ctx = PackContext::new().with_bootstrap_module(&boot);
        let packaged = build_directory(&req, &ctx).await.unwrap();

        assert_eq!(packaged.entry_filename, "___fn-entry-point.mjs");
        assert!(!packaged.conflict);
        let mut roots: Vec<String> = fs::read_dir(&fx.out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        roots.sort();
        assert_eq!(
            roots,
            vec![BOOTSTRAP_FILENAME, "___fn-entry-point.mjs", "hello", "hello.mjs"]
        );
        assert_eq!(
            fs::read_to_string(fx.out.join("hello.mjs")).unwrap(),
            "export const handler = () => 2"
        );
        let entry = fs::read_to_string(fx.out.join("___fn-entry-point.mjs")).unwrap();
        assert!(entry.contains("from './hello.mjs'"), "{entry}");
        assert!(entry.contains("from './___fn-bootstrap.mjs'"), "{entry}");
    }

    #[tokio::test]
    async fn sources_inside_destination_survive() {
        let fx = fixture();
        let out = fx.src.join("out/hello");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("keep.js"), "keep me").unwrap();

        let req = PackagingRequest::new("hello", &fx.src, fx.src.join("hello/index.js"), &out)
            .with_src_files([fx.src.join("hello/index.js"), out.join("keep.js")]);
        let err = build_directory(&req, &PackContext::new()).await.unwrap_err();

        assert!(matches!(err, PackError::InvalidRequest { .. }), "{err:?}");
        assert_eq!(fs::read_to_string(out.join("keep.js")).unwrap(), "keep me");
    }

    #[tokio::test]
    async fn missing_source_fails_the_build() {
        let fx = fixture();
        let req = request(&fx).with_src_files([
            fx.src.join("hello/index.js"),
            fx.src.join("hello/lib/gone.js"),
        ]);
        let err = build_directory(&req, &PackContext::new()).await.unwrap_err();
        assert!(matches!(err, PackError::MissingSource { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_recreated_not_copied() {
        let fx = fixture();
        std::os::unix::fs::symlink("lib/util.js", fx.src.join("hello/alias.js")).unwrap();
        std::os::unix::fs::symlink("/etc/hostname", fx.src.join("hello/host")).unwrap();

        let req = request(&fx).with_src_files([
            fx.src.join("hello/index.js"),
            fx.src.join("hello/alias.js"),
            fx.src.join("hello/host"),
            fx.src.join("hello/lib/util.js"),
        ]);
        build_directory(&req, &PackContext::new()).await.unwrap();

        let alias = fx.out.join("hello/alias.js");
        assert!(alias.is_symlink());
        assert_eq!(fs::read_link(&alias).unwrap(), PathBuf::from("lib/util.js"));
        assert_eq!(fs::read_to_string(&alias).unwrap(), "module.exports = 42");

        let external = fx.out.join("hello/host");
        assert!(external.is_symlink());
        assert_eq!(fs::read_link(&external).unwrap(), PathBuf::from("/etc/hostname"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_into_namespace_points_at_relocated_target() {
        let fx = fixture();
        fs::write(fx.src.join("hello.js"), "user code").unwrap();
        std::os::unix::fs::symlink(
            fx.src.join("hello/lib/util.js"),
            fx.src.join("hello/abs-link.js"),
        )
        .unwrap();

        let req = request(&fx).with_src_files([
            fx.src.join("hello/index.js"),
            fx.src.join("hello/lib/util.js"),
            fx.src.join("hello/abs-link.js"),
            fx.src.join("hello.js"),
        ]);
        build_directory(&req, &PackContext::new()).await.unwrap();

        let link = fx.out.join("___fn-user-code/hello/abs-link.js");
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("lib/util.js"));
        assert_eq!(fs::read_to_string(&link).unwrap(), "module.exports = 42");
    }
}
