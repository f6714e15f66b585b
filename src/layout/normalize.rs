use std::path::{Component, Path};

/// Map an absolute source path to its relative destination inside the
/// artifact.
///
/// The common prefix is stripped and `user_namespace` (possibly empty) is
/// prepended. When the path lies outside the prefix, or the remainder would
/// climb out of the artifact root, only the file's base name is kept.
///
/// The result always uses `/` separators and never starts with one.
pub fn normalize(path: &Path, common_prefix: &Path, user_namespace: &str) -> String {
    let relative = path
        .strip_prefix(common_prefix)
        .ok()
        .and_then(contained_segments)
        .unwrap_or_else(|| base_name(path));

    join_namespace(user_namespace, &relative)
}

/// Prepend a namespace sub-directory to an already-relative path.
pub fn join_namespace(user_namespace: &str, relative: &str) -> String {
    let namespace = user_namespace.trim_matches('/');
    if namespace.is_empty() {
        relative.to_string()
    } else {
        format!("{namespace}/{relative}")
    }
}

fn contained_segments(relative: &Path) -> Option<String> {
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().trim_matches('/').replace('/', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_common_prefix() {
        let out = normalize(
            Path::new("/repo/functions/hello/lib/util.js"),
            Path::new("/repo/functions"),
            "",
        );
        assert_eq!(out, "hello/lib/util.js");
    }

    #[test]
    fn prepends_namespace() {
        let out = normalize(
            Path::new("/repo/functions/hello.js"),
            Path::new("/repo/functions"),
            "___fn-user-code",
        );
        assert_eq!(out, "___fn-user-code/hello.js");
    }

    #[test]
    fn path_outside_prefix_falls_back_to_base_name() {
        let out = normalize(
            Path::new("/opt/shared/runtime.mjs"),
            Path::new("/repo/functions"),
            "",
        );
        assert_eq!(out, "runtime.mjs");
    }

    #[test]
    fn traversal_after_prefix_falls_back_to_base_name() {
        let out = normalize(
            Path::new("/repo/functions/../secrets/key.pem"),
            Path::new("/repo/functions"),
            "ns",
        );
        assert_eq!(out, "ns/key.pem");
    }

    #[test]
    fn path_equal_to_prefix_keeps_its_name() {
        let out = normalize(Path::new("/repo/functions"), Path::new("/repo/functions"), "");
        assert_eq!(out, "functions");
    }

    #[test]
    fn cur_dir_components_are_dropped() {
        let out = normalize(Path::new("/repo/./a/./b.js"), Path::new("/repo"), "");
        assert_eq!(out, "a/b.js");
    }

    #[test]
    fn is_pure() {
        let a = normalize(Path::new("/r/x/y.js"), Path::new("/r"), "ns/");
        let b = normalize(Path::new("/r/x/y.js"), Path::new("/r"), "ns/");
        assert_eq!(a, b);
        assert_eq!(a, "ns/x/y.js");
    }
}
