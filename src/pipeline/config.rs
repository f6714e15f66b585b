use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::sources::{expand_src_dir, extend_unique};
use crate::request::{
    ArchiveFormat, FeatureFlags, ModuleFormat, PackagingMode, PackagingRequest, RuntimeApiVersion,
};

/// A fully resolved build: every path absolute, every request ready to
/// package.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub output_dir: PathBuf,
    pub mode: PackagingMode,
    pub bootstrap_module: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub requests: Vec<PackagingRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildFileToml {
    build: BuildToml,
    #[serde(default, rename = "function")]
    functions: Vec<FunctionToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildToml {
    output_dir: String,
    mode: Option<String>,
    archive_format: Option<String>,
    bootstrap_module: Option<String>,
    concurrency: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FunctionToml {
    name: String,
    base_path: String,
    main_file: String,
    #[serde(default)]
    src_files: Vec<String>,
    #[serde(default)]
    src_dirs: Vec<String>,
    module_format: Option<String>,
    runtime_api_version: Option<u32>,
    #[serde(default)]
    feature_flags: Vec<String>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
    #[serde(default)]
    rewrites: BTreeMap<String, String>,
}

/// Load a build file and resolve it into packaging requests.
///
/// Relative paths resolve against the directory holding the build file.
pub fn load_build_config(config_path: &Path) -> Result<BuildConfig> {
    let config_bytes = fs::read_to_string(config_path)
        .with_context(|| format!("reading build config '{}'", config_path.display()))?;
    let root = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let root = if root.is_absolute() {
        root
    } else {
        std::env::current_dir()
            .context("resolving current directory")?
            .join(root)
    };
    parse_build_config(&config_bytes, &root, config_path)
}

pub(crate) fn parse_build_config(
    config_bytes: &str,
    root: &Path,
    config_path: &Path,
) -> Result<BuildConfig> {
    let parsed: BuildFileToml = toml::from_str(config_bytes)
        .with_context(|| format!("parsing build config '{}'", config_path.display()))?;

    let build = parsed.build;
    let mode = parse_mode(
        build.mode.as_deref(),
        build.archive_format.as_deref(),
        config_path,
    )?;
    let output_dir = resolve_path(root, &build.output_dir);
    let bootstrap_module = build
        .bootstrap_module
        .as_deref()
        .map(|path| resolve_path(root, path));

    if parsed.functions.is_empty() {
        bail!(
            "invalid build config '{}': no [[function]] entries",
            config_path.display()
        );
    }

    let mut seen = std::collections::BTreeSet::new();
    let mut requests = Vec::with_capacity(parsed.functions.len());
    for function in parsed.functions {
        if !seen.insert(function.name.clone()) {
            bail!(
                "invalid build config '{}': function '{}' is declared twice",
                config_path.display(),
                function.name
            );
        }
        let request = build_request(function, root, &output_dir, mode, config_path)?;
        requests.push(request);
    }

    Ok(BuildConfig {
        output_dir,
        mode,
        bootstrap_module,
        concurrency: build.concurrency,
        requests,
    })
}

fn build_request(
    function: FunctionToml,
    root: &Path,
    output_dir: &Path,
    mode: PackagingMode,
    config_path: &Path,
) -> Result<PackagingRequest> {
    let name = function.name.trim().to_string();
    if name.is_empty() || name.contains(['/', '\\']) {
        bail!(
            "invalid build config '{}': function name '{}' must be a non-empty file name",
            config_path.display(),
            function.name
        );
    }

    let module_format = match function.module_format.as_deref() {
        None => ModuleFormat::CommonJs,
        Some(raw) => ModuleFormat::parse(raw).with_context(|| {
            format!(
                "invalid build config '{}': function '{}' has unsupported module_format '{}' (expected 'cjs' or 'esm')",
                config_path.display(),
                name,
                raw
            )
        })?,
    };

    let runtime_api_version = match function.runtime_api_version {
        None => RuntimeApiVersion::V1,
        Some(raw) => RuntimeApiVersion::from_number(raw).with_context(|| {
            format!(
                "invalid build config '{}': function '{}' has unsupported runtime_api_version {} (expected 1 or 2)",
                config_path.display(),
                name,
                raw
            )
        })?,
    };

    let mut feature_flags = FeatureFlags::default();
    for flag in &function.feature_flags {
        if !feature_flags.enable(flag) {
            bail!(
                "invalid build config '{}': function '{}' has unknown feature flag '{}'",
                config_path.display(),
                name,
                flag
            );
        }
    }

    let base_path = resolve_path(root, &function.base_path);
    let main_file = resolve_path(root, &function.main_file);

    let mut src_files = vec![main_file.clone()];
    extend_unique(
        &mut src_files,
        function.src_files.iter().map(|path| resolve_path(root, path)),
    );
    for dir in &function.src_dirs {
        let expanded = expand_src_dir(&resolve_path(root, dir)).with_context(|| {
            format!("expanding src_dirs of function '{}'", name)
        })?;
        extend_unique(&mut src_files, expanded);
    }

    let rewrites: BTreeMap<PathBuf, String> = function
        .rewrites
        .into_iter()
        .map(|(path, contents)| (resolve_path(root, &path), contents))
        .collect();
    // Rewritten files need not exist on disk; they are packaged regardless.
    extend_unique(&mut src_files, rewrites.keys().cloned());

    let aliases = function
        .aliases
        .into_iter()
        .map(|(path, alias)| (resolve_path(root, &path), PathBuf::from(alias)))
        .collect();

    let destination = match mode {
        PackagingMode::Directory => output_dir.join(&name),
        PackagingMode::Archive(format) => {
            output_dir.join(format!("{}.{}", name, format.extension()))
        }
    };

    let mut request = PackagingRequest::new(name, base_path, main_file, destination)
        .with_src_files(src_files)
        .with_module_format(module_format)
        .with_runtime_api_version(runtime_api_version)
        .with_feature_flags(feature_flags);
    request.aliases = aliases;
    request.rewrites = rewrites;
    Ok(request)
}

fn parse_mode(
    mode: Option<&str>,
    archive_format: Option<&str>,
    config_path: &Path,
) -> Result<PackagingMode> {
    let format = match archive_format.map(|raw| raw.trim().to_ascii_lowercase()) {
        None => ArchiveFormat::default(),
        Some(raw) => match raw.as_str() {
            "zip" => ArchiveFormat::Zip,
            "tar_zst" | "tar.zst" => ArchiveFormat::TarZst,
            other => bail!(
                "invalid build config '{}': unsupported archive_format '{}' (expected 'zip' or 'tar_zst')",
                config_path.display(),
                other
            ),
        },
    };

    match mode.map(|raw| raw.trim().to_ascii_lowercase()).as_deref() {
        None | Some("archive") => Ok(PackagingMode::Archive(format)),
        Some("directory") => {
            if archive_format.is_some() {
                bail!(
                    "invalid build config '{}': archive_format has no effect with mode 'directory'",
                    config_path.display()
                );
            }
            Ok(PackagingMode::Directory)
        }
        Some(other) => bail!(
            "invalid build config '{}': unsupported mode '{}' (expected 'archive' or 'directory')",
            config_path.display(),
            other
        ),
    }
}

fn resolve_path(root: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    }
}
