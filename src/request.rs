//! The description of one function to package.
//!
//! A [`PackagingRequest`] is built once per function per build, handed to
//! exactly one builder, and never mutated after packaging starts. Builders
//! that need to extend the file set (bootstrap injection) work on their own
//! copy of the file list.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Source module convention of the function's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleFormat {
    CommonJs,
    Esm,
}

impl ModuleFormat {
    /// Parse the config spelling (`cjs`, `commonjs`, `esm`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cjs" | "commonjs" => Some(Self::CommonJs),
            "esm" | "module" => Some(Self::Esm),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleFormat::CommonJs => write!(f, "cjs"),
            ModuleFormat::Esm => write!(f, "esm"),
        }
    }
}

/// Runtime contract generation.
///
/// `V2` requires the bootstrap module and always a freshly generated entry
/// file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RuntimeApiVersion {
    V1 = 1,
    V2 = 2,
}

impl RuntimeApiVersion {
    pub fn from_number(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }
}

impl fmt::Display for RuntimeApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", *self as u8)
    }
}

/// Closed set of toggles that alter packaging behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Ship a telemetry loader next to the entry file.
    pub telemetry_loader: bool,
    /// Always generate an entry file under the reserved unique name.
    pub unique_entry_file: bool,
}

impl FeatureFlags {
    /// Enable a flag by its config name. Returns `false` for unknown names.
    pub fn enable(&mut self, name: &str) -> bool {
        match name.trim() {
            "telemetry_loader" => self.telemetry_loader = true,
            "unique_entry_file" => self.unique_entry_file = true,
            _ => return false,
        }
        true
    }
}

/// Output shape of a packaging run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackagingMode {
    Directory,
    Archive(ArchiveFormat),
}

/// Archive encoding used in archive mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArchiveFormat {
    #[default]
    Zip,
    /// A tar archive compressed with zstd.
    TarZst,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarZst => "tar.zst",
        }
    }
}

/// Immutable description of one function to package.
#[derive(Debug, Clone)]
pub struct PackagingRequest {
    /// Function identity, used for legacy entry naming and error reports.
    pub name: String,
    /// Common prefix used to compute the relative layout.
    pub base_path: PathBuf,
    /// Absolute path to the function's primary source file.
    pub main_file: PathBuf,
    /// Dependency closure, in input order. May contain duplicates.
    pub src_files: Vec<PathBuf>,
    /// Source path → destination name relative to the artifact root.
    pub aliases: BTreeMap<PathBuf, PathBuf>,
    /// Source path → literal content; never read from disk.
    pub rewrites: BTreeMap<PathBuf, String>,
    pub module_format: ModuleFormat,
    pub runtime_api_version: RuntimeApiVersion,
    pub feature_flags: FeatureFlags,
    /// Target folder (directory mode) or archive path (archive mode).
    pub destination: PathBuf,
}

impl PackagingRequest {
    /// Minimal request for a single-file function; the remaining fields
    /// default to a legacy CommonJS function with no aliases or rewrites.
    pub fn new(
        name: impl Into<String>,
        base_path: impl Into<PathBuf>,
        main_file: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        let main_file = main_file.into();
        Self {
            name: name.into(),
            base_path: base_path.into(),
            src_files: vec![main_file.clone()],
            main_file,
            aliases: BTreeMap::new(),
            rewrites: BTreeMap::new(),
            module_format: ModuleFormat::CommonJs,
            runtime_api_version: RuntimeApiVersion::V1,
            feature_flags: FeatureFlags::default(),
            destination: destination.into(),
        }
    }

    pub fn with_src_files(mut self, files: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.src_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_module_format(mut self, format: ModuleFormat) -> Self {
        self.module_format = format;
        self
    }

    pub fn with_runtime_api_version(mut self, version: RuntimeApiVersion) -> Self {
        self.runtime_api_version = version;
        self
    }

    pub fn with_feature_flags(mut self, flags: FeatureFlags) -> Self {
        self.feature_flags = flags;
        self
    }

    pub fn with_alias(
        mut self,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        self.aliases.insert(source.into(), destination.into());
        self
    }

    pub fn with_rewrite(mut self, source: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.rewrites.insert(source.into(), contents.into());
        self
    }
}
