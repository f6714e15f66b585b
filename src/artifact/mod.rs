//! Artifact builders for packaged functions.
//!
//! - [`directory`] - expanded directory output
//! - [`archive`] - single deterministic archive output
//! - [`codec`] - zip and tar.zst archive sinks
//! - [`filesystem`] - retrying cleanup, copy, write, symlink primitives
//! - [`digest`] - sha256 of finished archives
//!
//! [`package`] packages one function; [`package_all`] packages a whole build,
//! isolating failures per function.
//!
//! # Example
//!
//! ```rust,ignore
//! use function_packager::artifact::{package, PackContext};
//! use function_packager::{PackagingMode, PackagingRequest};
//!
//! let ctx = PackContext::new();
//! let request = PackagingRequest::new("hello", "/src", "/src/hello/index.js", "/dist/hello.zip");
//! let packaged = package(&request, PackagingMode::Archive(Default::default()), &ctx).await?;
//! println!("{} -> {}", packaged.path.display(), packaged.entry_filename);
//! ```

pub mod archive;
pub mod codec;
pub mod digest;
pub mod directory;
pub mod filesystem;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, Instrument};

use crate::entry::{
    EntryRequest, EntrySynthesizer, FunctionMetadata, SynthesizedFile, TemplateSynthesizer,
};
use crate::error::{PackError, PackResult};
use crate::layout::{
    decide, resolve_destination, ArtifactLayout, EntryDecision, EntryDecisionInput, FileSet,
    TELEMETRY_FILENAME,
};
use crate::request::{PackagingMode, PackagingRequest};
use crate::stat_cache::StatCache;

/// Floor for the bulk I/O worker pool.
pub const MIN_WORKERS: usize = 2;

/// Worker count derived from the host's available parallelism.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(MIN_WORKERS)
}

/// Build-scoped state shared by every function packaged in one build.
#[derive(Clone)]
pub struct PackContext {
    pub stat_cache: Arc<StatCache>,
    pub synthesizer: Arc<dyn EntrySynthesizer>,
    /// Pre-built module injected into runtime API v2 functions.
    pub bootstrap_module: Option<PathBuf>,
    pub cleanup_attempts: u32,
    io_permits: Arc<Semaphore>,
    concurrency: usize,
}

impl std::fmt::Debug for PackContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackContext")
            .field("stat_cache", &self.stat_cache)
            .field("bootstrap_module", &self.bootstrap_module)
            .field("cleanup_attempts", &self.cleanup_attempts)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl Default for PackContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PackContext {
    pub fn new() -> Self {
        let concurrency = default_concurrency();
        Self {
            stat_cache: Arc::new(StatCache::new()),
            synthesizer: Arc::new(TemplateSynthesizer::new()),
            bootstrap_module: None,
            cleanup_attempts: filesystem::DEFAULT_CLEANUP_ATTEMPTS,
            io_permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    /// Override the worker count; values below [`MIN_WORKERS`] are raised.
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        let workers = workers.max(MIN_WORKERS);
        self.concurrency = workers;
        self.io_permits = Arc::new(Semaphore::new(workers));
        self
    }

    pub fn with_stat_cache(mut self, cache: Arc<StatCache>) -> Self {
        self.stat_cache = cache;
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn EntrySynthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_bootstrap_module(mut self, module: impl Into<PathBuf>) -> Self {
        self.bootstrap_module = Some(module.into());
        self
    }

    pub fn with_cleanup_attempts(mut self, attempts: u32) -> Self {
        self.cleanup_attempts = attempts.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub(crate) fn io_permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.io_permits)
    }
}

/// sha256 and size of a finished archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDigest {
    pub sha256: String,
    pub size_bytes: u64,
}

/// Result of packaging one function.
#[derive(Debug, Clone)]
pub struct PackagedFunction {
    pub name: String,
    /// Output folder or archive file.
    pub path: PathBuf,
    /// Generated entry filename, or the main file's destination when no
    /// entry file was needed.
    pub entry_filename: String,
    pub conflict: bool,
    pub user_namespace: String,
    /// Present for archive output only.
    pub digest: Option<ArtifactDigest>,
}

/// Decision and synthesized content shared by both builders.
#[derive(Debug, Clone)]
pub(crate) struct Prepared {
    pub decision: EntryDecision,
    pub entry: Option<SynthesizedFile>,
    pub telemetry: Option<SynthesizedFile>,
    pub entry_filename: String,
}

impl Prepared {
    /// Root names of the generated files, in write order.
    pub fn generated_names(&self) -> Vec<String> {
        self.entry
            .iter()
            .chain(self.telemetry.iter())
            .map(|file| file.filename.clone())
            .collect()
    }

    /// Generated files in archive order: entry first, telemetry next.
    pub fn generated_files(&self) -> impl Iterator<Item = &SynthesizedFile> {
        self.entry.iter().chain(self.telemetry.iter())
    }
}

pub(crate) fn prepare(request: &PackagingRequest, ctx: &PackContext) -> PackResult<Prepared> {
    let synthesizer = ctx.synthesizer.as_ref();
    let input = EntryDecisionInput::for_request(request, synthesizer);
    let decision = decide(&request.src_files, &input);

    let main_path = resolve_destination(
        &request.main_file,
        &FileSet::from_request(request),
        &request.base_path,
        decision.user_namespace,
    );
    let metadata = FunctionMetadata {
        name: request.name.clone(),
        main_path: main_path.clone(),
        feature_flags: request.feature_flags,
    };

    let entry = if decision.needs_entry_file {
        let file = synthesizer.synthesize_entry(&EntryRequest {
            module_format: request.module_format,
            function: metadata.clone(),
            user_namespace: decision.user_namespace.to_string(),
            runtime_api_version: request.runtime_api_version,
        });
        if file.filename != input.entry_filename {
            return Err(PackError::EntryNameMismatch {
                expected: input.entry_filename,
                actual: file.filename,
            });
        }
        Some(file)
    } else {
        None
    };

    let telemetry = if request.feature_flags.telemetry_loader {
        let file = synthesizer.synthesize_telemetry(&metadata);
        if file.filename != TELEMETRY_FILENAME {
            return Err(PackError::EntryNameMismatch {
                expected: TELEMETRY_FILENAME.to_string(),
                actual: file.filename,
            });
        }
        Some(file)
    } else {
        None
    };

    let entry_filename = entry
        .as_ref()
        .map(|file| file.filename.clone())
        .unwrap_or(main_path);

    Ok(Prepared {
        decision,
        entry,
        telemetry,
        entry_filename,
    })
}

/// Where a recreated symlink should point.
///
/// When the link's target is itself packaged, the link points at the
/// target's final location, relative to the link. Otherwise the original
/// target text is kept.
pub(crate) fn link_target(
    link_source: &Path,
    raw_target: &Path,
    link_destination: &str,
    layout: &ArtifactLayout,
) -> PathBuf {
    let absolute = if raw_target.is_absolute() {
        raw_target.to_path_buf()
    } else {
        link_source
            .parent()
            .unwrap_or_else(|| Path::new("/"))
            .join(raw_target)
    };

    let Some(target_destination) = layout.destination_of(&lexical_clean(&absolute)) else {
        return raw_target.to_path_buf();
    };

    let link_dir = Path::new(link_destination)
        .parent()
        .unwrap_or_else(|| Path::new(""));
    pathdiff::diff_paths(target_destination, link_dir)
        .unwrap_or_else(|| PathBuf::from(target_destination))
}

/// Resolve `.` and `..` without touching the filesystem.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Package one function.
///
/// The request is validated by [`crate::preflight::check_request`] before
/// the builder touches the filesystem. Errors carry the function's name.
pub async fn package(
    request: &PackagingRequest,
    mode: PackagingMode,
    ctx: &PackContext,
) -> PackResult<PackagedFunction> {
    let span = tracing::info_span!("package", function = %request.name);
    async {
        let packaged = match mode {
            PackagingMode::Directory => directory::build_directory(request, ctx).await?,
            PackagingMode::Archive(format) => archive::build_archive(request, format, ctx).await?,
        };
        info!(
            ?mode,
            path = %packaged.path.display(),
            entry = %packaged.entry_filename,
            conflict = packaged.conflict,
            "packaged function"
        );
        Ok::<_, PackError>(packaged)
    }
    .instrument(span)
    .await
    .map_err(|e| e.for_function(&request.name))
}

/// Package every request of a build concurrently.
///
/// Results come back in request order; one function failing leaves the
/// others untouched.
pub async fn package_all(
    requests: Vec<PackagingRequest>,
    mode: PackagingMode,
    ctx: &PackContext,
) -> Vec<PackResult<PackagedFunction>> {
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let ctx = ctx.clone();
            let name = request.name.clone();
            let handle = tokio::spawn(async move { package(&request, mode, &ctx).await });
            (name, handle)
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(PackError::from(e).for_function(name)),
        };
        results.push(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{plan_layout, USER_NAMESPACE};
    use crate::request::{ArchiveFormat, RuntimeApiVersion};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn concurrency_has_a_floor() {
        assert!(default_concurrency() >= MIN_WORKERS);
        assert_eq!(PackContext::new().with_concurrency(0).concurrency(), MIN_WORKERS);
    }

    #[test]
    fn lexical_clean_resolves_parent_components() {
        assert_eq!(
            lexical_clean(Path::new("/src/lib/../shared/./x.js")),
            PathBuf::from("/src/shared/x.js")
        );
    }

    #[test]
    fn link_to_packaged_target_follows_namespace() {
        let req = PackagingRequest::new("hello", "/src", "/src/index.js", "/out")
            .with_src_files(["/src/index.js", "/src/lib/link.js", "/src/shared/x.js"]);
        let layout =
            plan_layout(&req, &FileSet::from_request(&req), USER_NAMESPACE, vec![]).unwrap();

        let target = link_target(
            Path::new("/src/lib/link.js"),
            Path::new("../shared/x.js"),
            "___fn-user-code/lib/link.js",
            &layout,
        );
        assert_eq!(target, PathBuf::from("../shared/x.js"));

        let external = link_target(
            Path::new("/src/lib/link.js"),
            Path::new("/usr/lib/node/x.js"),
            "___fn-user-code/lib/link.js",
            &layout,
        );
        assert_eq!(external, PathBuf::from("/usr/lib/node/x.js"));
    }

    #[test]
    fn absolute_link_to_packaged_target_becomes_relative() {
        let req = PackagingRequest::new("hello", "/src", "/src/index.js", "/out")
            .with_src_files(["/src/index.js", "/src/link.js", "/src/lib/x.js"]);
        let layout = plan_layout(&req, &FileSet::from_request(&req), "", vec![]).unwrap();
        let target = link_target(
            Path::new("/src/link.js"),
            Path::new("/src/lib/x.js"),
            "link.js",
            &layout,
        );
        assert_eq!(target, PathBuf::from("lib/x.js"));
    }

    #[test]
    fn prepare_reports_main_file_when_entry_is_skipped() {
        let req = PackagingRequest::new("hello", "/src", "/src/hello.js", "/out");
        let prepared = prepare(&req, &PackContext::new()).unwrap();
        assert!(prepared.entry.is_none());
        assert_eq!(prepared.entry_filename, "hello.js");
        assert!(prepared.generated_names().is_empty());
    }

    struct WrongName;

    impl EntrySynthesizer for WrongName {
        fn naming(&self) -> &dyn crate::entry::EntryNaming {
            &crate::entry::DefaultNaming
        }

        fn synthesize_entry(&self, _request: &EntryRequest) -> SynthesizedFile {
            SynthesizedFile {
                filename: "surprise.js".to_string(),
                contents: String::new(),
            }
        }

        fn synthesize_telemetry(&self, _function: &FunctionMetadata) -> SynthesizedFile {
            unreachable!()
        }
    }

    #[test]
    fn synthesizer_disagreeing_with_naming_is_an_invariant_error() {
        let req = PackagingRequest::new("hello", "/src", "/src/index.js", "/out");
        let ctx = PackContext::new().with_synthesizer(Arc::new(WrongName));
        let err = prepare(&req, &ctx).unwrap_err();
        assert!(matches!(err, PackError::EntryNameMismatch { .. }));
    }

    fn fixture(root: &Path) -> PathBuf {
        let src = root.join("src");
        fs::create_dir_all(src.join("lib")).unwrap();
        fs::write(src.join("index.js"), "exports.handler = require('./lib/a')").unwrap();
        fs::write(src.join("lib/a.js"), "module.exports = 1").unwrap();
        // A user file squatting on the legacy entry name.
        fs::write(src.join("hello.js"), "console.log('user')").unwrap();
        src
    }

    fn function(name: &str, src: &Path, destination: PathBuf) -> PackagingRequest {
        PackagingRequest::new(name, src, src.join("index.js"), destination)
    }

    #[tokio::test]
    async fn both_modes_agree_on_conflict_and_namespace() {
        let temp = TempDir::new().unwrap();
        let src = fixture(temp.path());
        let files = [src.join("index.js"), src.join("lib/a.js"), src.join("hello.js")];

        let ctx = PackContext::new();
        let dir_req =
            function("hello", &src, temp.path().join("out/dir")).with_src_files(files.clone());
        let zip_req =
            function("hello", &src, temp.path().join("out/hello.zip")).with_src_files(files);

        let dir = package(&dir_req, PackagingMode::Directory, &ctx).await.unwrap();
        let zip = package(&zip_req, PackagingMode::Archive(ArchiveFormat::Zip), &ctx)
            .await
            .unwrap();

        assert!(dir.conflict);
        assert_eq!(dir.conflict, zip.conflict);
        assert_eq!(dir.user_namespace, zip.user_namespace);
        assert_eq!(dir.entry_filename, zip.entry_filename);
        assert_eq!(dir.entry_filename, "hello.js");

        assert_eq!(
            fs::read_to_string(temp.path().join("out/dir/___fn-user-code/hello.js")).unwrap(),
            "console.log('user')"
        );
        let members = codec::list_zip_members(&zip.path).unwrap();
        assert_eq!(members[0], "hello.js");
        assert!(members.contains(&"___fn-user-code/hello.js".to_string()));
    }

    #[tokio::test]
    async fn file_aliased_onto_entry_name_is_namespaced_in_both_modes() {
        let temp = TempDir::new().unwrap();
        let src = fixture(temp.path());
        fs::write(src.join("lib/shim.js"), "module.exports = 'shim'").unwrap();
        let files = [src.join("index.js"), src.join("lib/a.js"), src.join("lib/shim.js")];

        let ctx = PackContext::new();
        let dir_req = function("hello", &src, temp.path().join("out/dir"))
            .with_src_files(files.clone())
            .with_alias(src.join("lib/shim.js"), "hello.js");
        let zip_req = function("hello", &src, temp.path().join("out/hello.zip"))
            .with_src_files(files)
            .with_alias(src.join("lib/shim.js"), "hello.js");

        let dir = package(&dir_req, PackagingMode::Directory, &ctx).await.unwrap();
        let zip = package(&zip_req, PackagingMode::Archive(ArchiveFormat::Zip), &ctx)
            .await
            .unwrap();

        assert!(dir.conflict);
        assert!(zip.conflict);
        assert_eq!(dir.user_namespace, USER_NAMESPACE);
        assert_eq!(zip.user_namespace, USER_NAMESPACE);

        let out = temp.path().join("out/dir");
        assert_eq!(
            fs::read_to_string(out.join("___fn-user-code/hello.js")).unwrap(),
            "module.exports = 'shim'"
        );
        assert_eq!(
            fs::read_to_string(out.join("hello.js")).unwrap(),
            "module.exports = require('./___fn-user-code/index.js')\n"
        );

        let members = codec::list_zip_members(&zip.path).unwrap();
        assert_eq!(members[0], "hello.js");
        assert!(members.contains(&"___fn-user-code/hello.js".to_string()));
        assert!(members.contains(&"___fn-user-code/index.js".to_string()));
        assert_eq!(members.iter().filter(|m| m.ends_with("hello.js")).count(), 2);
    }

    #[tokio::test]
    async fn one_failing_function_does_not_stop_the_build() {
        let temp = TempDir::new().unwrap();
        let src = fixture(temp.path());
        let ctx = PackContext::new();

        let good = function("good", &src, temp.path().join("out/good.zip"))
            .with_src_files([src.join("index.js"), src.join("lib/a.js")]);
        let bad = function("bad", &src, temp.path().join("out/bad.zip"))
            .with_src_files([src.join("index.js"), src.join("lib/missing.js")]);

        let results = package_all(
            vec![bad, good],
            PackagingMode::Archive(ArchiveFormat::Zip),
            &ctx,
        )
        .await;

        assert_eq!(results.len(), 2);
        match &results[0] {
            Err(PackError::Function { name, source }) => {
                assert_eq!(name, "bad");
                assert!(matches!(**source, PackError::MissingSource { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        let good = results[1].as_ref().unwrap();
        assert!(good.path.is_file());
        assert!(!temp.path().join("out/bad.zip").exists());
    }

    #[tokio::test]
    async fn v2_request_without_bootstrap_is_rejected_by_name() {
        let temp = TempDir::new().unwrap();
        let src = fixture(temp.path());
        let req = function("v2fn", &src, temp.path().join("out/v2"))
            .with_runtime_api_version(RuntimeApiVersion::V2);
        let err = package(&req, PackagingMode::Directory, &PackContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'v2fn'"), "{err}");
    }
}
