//! Bootstrap module injection for runtime API v2.
//!
//! Injection runs after the conflict decision, so the bootstrap never takes
//! part in conflict detection, and before layout planning, so it is laid out
//! at the artifact root next to the entry file.

use std::path::{Path, PathBuf};

use crate::error::{PackError, PackResult};
use crate::layout::{FileSet, BOOTSTRAP_FILENAME};
use crate::request::{PackagingRequest, RuntimeApiVersion};

/// Add the bootstrap module to `file_set` when the request needs it.
///
/// Returns `true` when a bootstrap was injected.
pub fn inject_bootstrap(
    request: &PackagingRequest,
    file_set: &mut FileSet,
    bootstrap_module: Option<&Path>,
) -> PackResult<bool> {
    if request.runtime_api_version != RuntimeApiVersion::V2 {
        return Ok(false);
    }

    let module = bootstrap_module.ok_or_else(|| {
        PackError::invalid_request(
            &request.name,
            "runtime API v2 requires a bootstrap module but none is configured",
        )
    })?;

    let module = module.to_path_buf();
    if !file_set.files.contains(&module) {
        file_set.files.push(module.clone());
    }
    file_set
        .aliases
        .insert(module.clone(), PathBuf::from(BOOTSTRAP_FILENAME));
    file_set.root_files.insert(module);
    Ok(true)
}
