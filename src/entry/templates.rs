use std::path::Path;

use super::{EntryNaming, EntryRequest, EntrySynthesizer, FunctionMetadata, SynthesizedFile};
use crate::layout::{BOOTSTRAP_FILENAME, TELEMETRY_FILENAME};
use crate::request::{FeatureFlags, ModuleFormat, RuntimeApiVersion};

/// Stem of the entry file when a unique name is required.
pub const UNIQUE_ENTRY_STEM: &str = "___fn-entry-point";

const ENTRY_EXTENSIONS: &[&str] = &["js", "cjs", "mjs"];

/// Naming convention shipped with the crate.
///
/// | version | unique flag | CommonJS | ESM |
/// |---|---|---|---|
/// | v1 | off | `<name>.js` | `<name>.mjs` |
/// | v1 | on | `___fn-entry-point.cjs` | `___fn-entry-point.mjs` |
/// | v2 | any | `___fn-entry-point.mjs` | `___fn-entry-point.mjs` |
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNaming;

impl EntryNaming for DefaultNaming {
    fn entry_filename(
        &self,
        function_name: &str,
        module_format: ModuleFormat,
        runtime_api_version: RuntimeApiVersion,
        feature_flags: &FeatureFlags,
    ) -> String {
        if runtime_api_version == RuntimeApiVersion::V2 {
            return format!("{UNIQUE_ENTRY_STEM}.mjs");
        }
        let stem = if feature_flags.unique_entry_file {
            UNIQUE_ENTRY_STEM
        } else {
            function_name
        };
        match (module_format, feature_flags.unique_entry_file) {
            (ModuleFormat::CommonJs, true) => format!("{stem}.cjs"),
            (ModuleFormat::CommonJs, false) => format!("{stem}.js"),
            (ModuleFormat::Esm, _) => format!("{stem}.mjs"),
        }
    }

    fn is_named_like_entry(&self, main_file: &Path, base_path: &Path, function_name: &str) -> bool {
        ENTRY_EXTENSIONS
            .iter()
            .any(|ext| base_path.join(format!("{function_name}.{ext}")) == main_file)
    }
}

/// The shapes an entry file can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTemplate {
    /// `module.exports = require(main)`
    CommonJsRequire,
    /// Re-export the main module's named and default exports.
    EsmReexport,
    /// Hand the CommonJS export object to the bootstrap.
    BootstrapDefaultImport,
    /// Hand the ESM namespace object to the bootstrap.
    BootstrapNamespaceImport,
}

impl EntryTemplate {
    pub fn select(module_format: ModuleFormat, runtime_api_version: RuntimeApiVersion) -> Self {
        match (module_format, runtime_api_version) {
            (ModuleFormat::CommonJs, RuntimeApiVersion::V1) => Self::CommonJsRequire,
            (ModuleFormat::Esm, RuntimeApiVersion::V1) => Self::EsmReexport,
            (ModuleFormat::CommonJs, RuntimeApiVersion::V2) => Self::BootstrapDefaultImport,
            (ModuleFormat::Esm, RuntimeApiVersion::V2) => Self::BootstrapNamespaceImport,
        }
    }

    pub fn render(&self, main_path: &str) -> String {
        let specifier = format!("./{}", main_path.trim_start_matches("./"));
        match self {
            EntryTemplate::CommonJsRequire => {
                format!("module.exports = require('{specifier}')\n")
            }
            EntryTemplate::EsmReexport => format!(
                "import * as func from '{specifier}'\n\
                 export * from '{specifier}'\n\
                 export default func.default\n"
            ),
            EntryTemplate::BootstrapDefaultImport => format!(
                "import {{ getHandler }} from './{BOOTSTRAP_FILENAME}'\n\
                 import func from '{specifier}'\n\
                 export const handler = getHandler(func)\n"
            ),
            EntryTemplate::BootstrapNamespaceImport => format!(
                "import {{ getHandler }} from './{BOOTSTRAP_FILENAME}'\n\
                 import * as func from '{specifier}'\n\
                 export const handler = getHandler(func)\n"
            ),
        }
    }
}

/// Default [`EntrySynthesizer`]: [`DefaultNaming`] plus [`EntryTemplate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateSynthesizer {
    naming: DefaultNaming,
}

impl TemplateSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntrySynthesizer for TemplateSynthesizer {
    fn naming(&self) -> &dyn EntryNaming {
        &self.naming
    }

    fn synthesize_entry(&self, request: &EntryRequest) -> SynthesizedFile {
        let template = EntryTemplate::select(request.module_format, request.runtime_api_version);
        SynthesizedFile {
            filename: self.naming.entry_filename(
                &request.function.name,
                request.module_format,
                request.runtime_api_version,
                &request.function.feature_flags,
            ),
            contents: template.render(&request.function.main_path),
        }
    }

    fn synthesize_telemetry(&self, function: &FunctionMetadata) -> SynthesizedFile {
        SynthesizedFile {
            filename: TELEMETRY_FILENAME.to_string(),
            contents: format!(
                "// telemetry loader for {}\n\
                 const hook = process.env.FN_TELEMETRY_HOOK\n\
                 if (hook) {{\n  await import(hook)\n}}\n",
                function.name
            ),
        }
    }
}
