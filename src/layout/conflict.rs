//! Entry-file conflict detection and the entry-necessity decision.
//!
//! Both builders call [`decide`] with an input assembled by
//! [`EntryDecisionInput::for_request`], so directory and archive output of
//! the same request always agree on the conflict flag and the namespace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{aliased_destination, BOOTSTRAP_FILENAME, TELEMETRY_FILENAME, USER_NAMESPACE};
use crate::entry::EntrySynthesizer;
use crate::request::{PackagingRequest, RuntimeApiVersion};

/// Everything the decision depends on, with no I/O behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDecisionInput {
    pub base_path: PathBuf,
    pub main_file: PathBuf,
    /// Destination overrides; conflicts are judged on the aliased name.
    pub aliases: BTreeMap<PathBuf, PathBuf>,
    /// Filename the entry synthesizer will use at the artifact root.
    pub entry_filename: String,
    /// Whether the main file already sits where the entry file would go.
    pub main_named_like_entry: bool,
    pub unique_entry_file: bool,
    pub telemetry_loader: bool,
    pub runtime_api_version: RuntimeApiVersion,
}

impl EntryDecisionInput {
    pub fn for_request(request: &PackagingRequest, synthesizer: &dyn EntrySynthesizer) -> Self {
        let naming = synthesizer.naming();
        Self {
            base_path: request.base_path.clone(),
            main_file: request.main_file.clone(),
            aliases: request.aliases.clone(),
            entry_filename: naming.entry_filename(
                &request.name,
                request.module_format,
                request.runtime_api_version,
                &request.feature_flags,
            ),
            main_named_like_entry: naming.is_named_like_entry(
                &request.main_file,
                &request.base_path,
                &request.name,
            ),
            unique_entry_file: request.feature_flags.unique_entry_file,
            telemetry_loader: request.feature_flags.telemetry_loader,
            runtime_api_version: request.runtime_api_version,
        }
    }

    /// The entry file cannot be skipped in favour of the user's main file.
    pub fn entry_forced(&self) -> bool {
        self.unique_entry_file || self.runtime_api_version == RuntimeApiVersion::V2
    }

    /// Names the packager writes at the artifact root, other than user files.
    pub fn reserved_root_names(&self) -> Vec<&str> {
        let mut names = vec![self.entry_filename.as_str()];
        if self.telemetry_loader {
            names.push(TELEMETRY_FILENAME);
        }
        if self.runtime_api_version == RuntimeApiVersion::V2 {
            names.push(BOOTSTRAP_FILENAME);
        }
        names
    }
}

/// Outcome shared by both builders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDecision {
    pub conflict: bool,
    /// `""` or [`USER_NAMESPACE`].
    pub user_namespace: &'static str,
    pub needs_entry_file: bool,
}

/// Whether any user file, aliased and laid out without a namespace, would
/// land on a reserved root name.
///
/// The main file may share the entry filename when the entry is not forced:
/// in that case it *is* the entry point and nothing is generated over it.
pub fn has_conflict(src_files: &[PathBuf], input: &EntryDecisionInput) -> bool {
    let reserved = input.reserved_root_names();
    src_files.iter().any(|src| {
        let normalized = aliased_destination(src, &input.aliases, &input.base_path, "");
        reserved.iter().enumerate().any(|(index, name)| {
            let is_entry_name = index == 0;
            if is_entry_name && !input.entry_forced() && is_main(src, &input.main_file) {
                return false;
            }
            normalized == *name
        })
    })
}

/// Whether a generated entry file has to be written.
pub fn needs_entry_file(input: &EntryDecisionInput, conflict: bool) -> bool {
    input.entry_forced() || conflict || !input.main_named_like_entry
}

pub fn decide(src_files: &[PathBuf], input: &EntryDecisionInput) -> EntryDecision {
    let conflict = has_conflict(src_files, input);
    EntryDecision {
        conflict,
        user_namespace: if conflict { USER_NAMESPACE } else { "" },
        needs_entry_file: needs_entry_file(input, conflict),
    }
}

fn is_main(src: &Path, main_file: &Path) -> bool {
    src == main_file
}
