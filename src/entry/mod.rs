//! Entry-point synthesis.
//!
//! The packager does not decide what the generated entry file says; it asks
//! an [`EntrySynthesizer`]. The synthesizer also owns the naming policy
//! ([`EntryNaming`]) because the conflict check needs the entry filename
//! before any content exists.
//!
//! [`TemplateSynthesizer`] is the default implementation.

pub mod templates;

use std::path::Path;

use crate::request::{FeatureFlags, ModuleFormat, RuntimeApiVersion};

pub use templates::{DefaultNaming, EntryTemplate, TemplateSynthesizer};

/// A generated file ready to be written at the artifact root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedFile {
    pub filename: String,
    pub contents: String,
}

/// What the synthesizer knows about the function it wraps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionMetadata {
    pub name: String,
    /// The user's main file, relative to the artifact root (namespace
    /// included).
    pub main_path: String,
    pub feature_flags: FeatureFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRequest {
    pub module_format: ModuleFormat,
    pub function: FunctionMetadata,
    pub user_namespace: String,
    pub runtime_api_version: RuntimeApiVersion,
}

/// Versioned naming convention for entry files.
pub trait EntryNaming: Send + Sync {
    /// Root filename of the generated entry file.
    fn entry_filename(
        &self,
        function_name: &str,
        module_format: ModuleFormat,
        runtime_api_version: RuntimeApiVersion,
        feature_flags: &FeatureFlags,
    ) -> String;

    /// Whether `main_file` already sits where a legacy entry file would be.
    fn is_named_like_entry(&self, main_file: &Path, base_path: &Path, function_name: &str) -> bool;
}

pub trait EntrySynthesizer: Send + Sync {
    fn naming(&self) -> &dyn EntryNaming;

    fn synthesize_entry(&self, request: &EntryRequest) -> SynthesizedFile;

    /// Telemetry loader; independent of the module format.
    fn synthesize_telemetry(&self, function: &FunctionMetadata) -> SynthesizedFile;
}
