//! Preflight checks for packaging requests.
//!
//! Validates a request before anything touches the filesystem, so a
//! malformed request fails with a message naming the function instead of
//! half-way through a copy or with a destroyed source tree.
//!
//! # Example
//!
//! ```rust
//! use function_packager::preflight::check_request;
//! use function_packager::PackagingRequest;
//!
//! let request = PackagingRequest::new("hello", "/src", "/src/hello/index.js", "/dist/hello.zip");
//! assert!(check_request(&request, None).is_ok());
//! ```

use std::path::{Path, PathBuf};

use crate::error::{PackError, PackResult};
use crate::request::{PackagingRequest, RuntimeApiVersion};

/// Check that `request` can be packaged.
///
/// # Checks
///
/// * every path is absolute
/// * the main file is one of the source files
/// * runtime API v2 has a bootstrap module configured
/// * the destination cannot be confused with the sources: it must not be
///   the base path or an ancestor of it, and no source file or bootstrap
///   module may lie at or below it
pub fn check_request(
    request: &PackagingRequest,
    bootstrap_module: Option<&Path>,
) -> PackResult<()> {
    let fail = |reason: String| Err(PackError::invalid_request(&request.name, reason));

    if request.name.trim().is_empty() {
        return fail("function name is empty".to_string());
    }

    let mut paths = vec![
        ("base path", request.base_path.as_path()),
        ("main file", request.main_file.as_path()),
        ("destination", request.destination.as_path()),
    ];
    paths.extend(request.src_files.iter().map(|p| ("source file", p.as_path())));
    paths.extend(request.rewrites.keys().map(|p| ("rewrite", p.as_path())));
    if let Some(module) = bootstrap_module {
        paths.push(("bootstrap module", module));
    }
    for (what, path) in paths {
        if !path.is_absolute() {
            return fail(format!("{what} '{}' is not absolute", path.display()));
        }
    }

    if !request.src_files.contains(&request.main_file) {
        return fail(format!(
            "main file '{}' is not listed in the source files",
            request.main_file.display()
        ));
    }

    if request.runtime_api_version == RuntimeApiVersion::V2 && bootstrap_module.is_none() {
        return fail(
            "runtime API v2 requires a bootstrap module but none is configured".to_string(),
        );
    }

    let destination = request.destination.as_path();
    if request.base_path.starts_with(destination) {
        return fail(format!(
            "destination '{}' contains the base path '{}'",
            destination.display(),
            request.base_path.display()
        ));
    }
    let inside_destination = request
        .src_files
        .iter()
        .map(PathBuf::as_path)
        .chain(bootstrap_module)
        .find(|src| src.starts_with(destination));
    if let Some(src) = inside_destination {
        return fail(format!(
            "source '{}' lies inside the destination '{}' and would be destroyed",
            src.display(),
            destination.display()
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PackagingRequest {
        PackagingRequest::new("hello", "/src", "/src/index.js", "/dist/hello")
            .with_src_files(["/src/index.js", "/src/lib/a.js"])
    }

    fn reason(err: PackError) -> String {
        match err {
            PackError::InvalidRequest { name, reason } => {
                assert_eq!(name, "hello");
                reason
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn valid_request_passes() {
        check_request(&request(), None).unwrap();
    }

    #[test]
    fn relative_source_is_rejected() {
        let req = request().with_src_files(["/src/index.js", "lib/a.js"]);
        let msg = reason(check_request(&req, None).unwrap_err());
        assert!(msg.contains("'lib/a.js' is not absolute"), "{msg}");
    }

    #[test]
    fn main_file_must_be_a_source() {
        let req = request().with_src_files(["/src/lib/a.js"]);
        let msg = reason(check_request(&req, None).unwrap_err());
        assert!(msg.contains("main file"), "{msg}");
    }

    #[test]
    fn v2_needs_bootstrap() {
        let req = request().with_runtime_api_version(RuntimeApiVersion::V2);
        assert!(check_request(&req, None).is_err());
        check_request(&req, Some(Path::new("/rt/boot.mjs"))).unwrap();
    }

    #[test]
    fn destination_may_not_swallow_sources() {
        let mut req = request();
        req.destination = PathBuf::from("/");
        let msg = reason(check_request(&req, None).unwrap_err());
        assert!(msg.contains("contains the base path"), "{msg}");

        req.destination = PathBuf::from("/src/lib/a.js");
        let msg = reason(check_request(&req, None).unwrap_err());
        assert!(msg.contains("lies inside the destination"), "{msg}");
    }

    #[test]
    fn sources_below_destination_are_rejected() {
        let req = PackagingRequest::new("hello", "/src", "/src/index.js", "/src/out/hello")
            .with_src_files(["/src/index.js", "/src/out/hello/keep.js"]);
        let msg = reason(check_request(&req, None).unwrap_err());
        assert!(msg.contains("'/src/out/hello/keep.js'"), "{msg}");
    }

    #[test]
    fn bootstrap_below_destination_is_rejected() {
        let req = request().with_runtime_api_version(RuntimeApiVersion::V2);
        let boot = Path::new("/dist/hello/boot.mjs");
        let msg = reason(check_request(&req, Some(boot)).unwrap_err());
        assert!(msg.contains("boot.mjs"), "{msg}");
    }

    #[test]
    fn sibling_with_shared_name_prefix_is_allowed() {
        let req = request().with_src_files(["/src/index.js", "/dist/hello-shared/a.js"]);
        check_request(&req, None).unwrap();
    }

    #[test]
    fn destination_below_base_is_allowed() {
        let mut req = request();
        req.destination = PathBuf::from("/src/.build/hello.zip");
        check_request(&req, None).unwrap();
    }
}
