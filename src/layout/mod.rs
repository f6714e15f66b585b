//! Artifact layout: where every input lands inside the artifact.
//!
//! - [`normalize`] - pure source path → relative destination mapping
//! - [`conflict`] - entry-name collisions and the user namespace decision
//!
//! [`plan_layout`] combines the two with aliases, rewrites and deduplication
//! into an [`ArtifactLayout`] whose destinations are guaranteed unique.

pub mod conflict;
pub mod normalize;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{PackError, PackResult};
use crate::request::PackagingRequest;

pub use conflict::{decide, has_conflict, needs_entry_file, EntryDecision, EntryDecisionInput};
pub use normalize::{join_namespace, normalize};

/// Sub-directory holding every user file when a conflict was detected.
pub const USER_NAMESPACE: &str = "___fn-user-code";

/// Reserved root name of the bootstrap module (runtime API v2).
pub const BOOTSTRAP_FILENAME: &str = "___fn-bootstrap.mjs";

/// Reserved root name of the telemetry loader.
pub const TELEMETRY_FILENAME: &str = "___fn-telemetry.mjs";

/// The builder-local view of a request's files.
///
/// Starts as a copy of the request and may be extended by the bootstrap
/// injector; the request itself is never mutated.
#[derive(Debug, Clone, Default)]
pub struct FileSet {
    pub files: Vec<PathBuf>,
    pub aliases: BTreeMap<PathBuf, PathBuf>,
    /// Sources laid out at the artifact root regardless of the namespace.
    pub root_files: BTreeSet<PathBuf>,
}

impl FileSet {
    pub fn from_request(request: &PackagingRequest) -> Self {
        Self {
            files: request.src_files.clone(),
            aliases: request.aliases.clone(),
            root_files: BTreeSet::new(),
        }
    }
}

/// One file in the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutEntry {
    pub source: PathBuf,
    pub destination: String,
    /// Literal contents from the request's rewrites.
    pub rewrite: Option<String>,
}

/// Resolved mapping of every input to its final relative path.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    pub user_namespace: &'static str,
    /// Generated files (entry, telemetry) written at the root.
    pub generated: Vec<String>,
    pub entries: Vec<LayoutEntry>,
    by_source: BTreeMap<PathBuf, String>,
}

impl ArtifactLayout {
    /// Final relative path of a packaged source.
    pub fn destination_of(&self, source: &Path) -> Option<&str> {
        self.by_source.get(source).map(String::as_str)
    }

    /// Every destination in the artifact, generated files first.
    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.generated
            .iter()
            .map(String::as_str)
            .chain(self.entries.iter().map(|e| e.destination.as_str()))
    }
}

/// Drop repeated paths, keeping the first occurrence's position.
pub fn dedupe_preserving_order(files: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::with_capacity(files.len());
    files
        .iter()
        .filter(|path| seen.insert(path.as_path()))
        .cloned()
        .collect()
}

/// Destination of one source: alias first, then normalization.
pub fn resolve_destination(
    source: &Path,
    file_set: &FileSet,
    base_path: &Path,
    user_namespace: &str,
) -> String {
    let namespace = if file_set.root_files.contains(source) {
        ""
    } else {
        user_namespace
    };
    aliased_destination(source, &file_set.aliases, base_path, namespace)
}

/// Normalize `source` after applying its alias, if any.
pub fn aliased_destination(
    source: &Path,
    aliases: &BTreeMap<PathBuf, PathBuf>,
    base_path: &Path,
    user_namespace: &str,
) -> String {
    match aliases.get(source) {
        Some(alias) if alias.is_absolute() => normalize(alias, base_path, user_namespace),
        Some(alias) => normalize(&base_path.join(alias), base_path, user_namespace),
        None => normalize(source, base_path, user_namespace),
    }
}

/// Plan the full layout of one artifact.
///
/// `generated` lists the root names of synthesized files so user files can
/// never silently replace them.
pub fn plan_layout(
    request: &PackagingRequest,
    file_set: &FileSet,
    user_namespace: &'static str,
    generated: Vec<String>,
) -> PackResult<ArtifactLayout> {
    let mut claimed: BTreeMap<String, String> = generated
        .iter()
        .map(|name| (name.clone(), format!("generated file '{name}'")))
        .collect();

    let files = dedupe_preserving_order(&file_set.files);
    let mut entries = Vec::with_capacity(files.len());
    let mut by_source = BTreeMap::new();

    for source in files {
        let destination =
            resolve_destination(&source, file_set, &request.base_path, user_namespace);
        let owner = source.display().to_string();
        if let Some(first) = claimed.insert(destination.clone(), owner.clone()) {
            return Err(PackError::DuplicateDestination {
                destination,
                first,
                second: owner,
            });
        }
        by_source.insert(source.clone(), destination.clone());
        entries.push(LayoutEntry {
            rewrite: request.rewrites.get(&source).cloned(),
            source,
            destination,
        });
    }

    Ok(ArtifactLayout {
        user_namespace,
        generated,
        entries,
        by_source,
    })
}
