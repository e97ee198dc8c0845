// src/vfs/path.rs
//! Sandbox-relative path handling
//!
//! Every staged file lives under a fixed root. Paths are resolved the way a
//! `file:` URL would resolve them against that root: `\` counts as a
//! separator, `.` segments vanish and `..` pops a segment. A path that pops
//! past the root, or that is absolute, escapes.

/// Normalise `path` relative to a sandbox root.
///
/// Returns `None` when the path is empty, absolute, or escapes the root.
pub fn normalize_relative(path: &str) -> Option<String> {
    if path.starts_with('/') || path.starts_with('\\') {
        return None;
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Join a normalised relative path onto an absolute root
pub fn join_root(root: &str, relative: &str) -> String {
    format!("{}/{}", root.trim_end_matches('/'), relative)
}

/// Strip `root` (and the following separator) from `path`, if present
pub fn strip_root<'a>(root: &str, path: &'a str) -> Option<&'a str> {
    let root = root.trim_end_matches('/');
    let rest = path.strip_prefix(root)?;
    if rest.is_empty() {
        return Some(rest);
    }
    rest.strip_prefix('/')
        .or_else(|| rest.strip_prefix('\\'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_paths() {
        assert_eq!(normalize_relative("model.mzn").as_deref(), Some("model.mzn"));
        assert_eq!(normalize_relative("./lib/a.mzn").as_deref(), Some("lib/a.mzn"));
        assert_eq!(normalize_relative("lib//b.mzn").as_deref(), Some("lib/b.mzn"));
        assert_eq!(normalize_relative("lib/../c.mzn").as_deref(), Some("c.mzn"));
    }

    #[test]
    fn test_escaping_paths() {
        assert_eq!(normalize_relative("../../etc/passwd"), None);
        assert_eq!(normalize_relative("lib/../../x.mzn"), None);
        assert_eq!(normalize_relative("..\\secret.dzn"), None);
        assert_eq!(normalize_relative("/etc/passwd"), None);
        assert_eq!(normalize_relative(""), None);
        assert_eq!(normalize_relative("lib/.."), None);
    }

    #[test]
    fn test_strip_root() {
        assert_eq!(strip_root("/minizinc", "/minizinc/_mzn_0.mzn"), Some("_mzn_0.mzn"));
        assert_eq!(strip_root("/minizinc/", "/minizinc/a/b.mzn"), Some("a/b.mzn"));
        assert_eq!(strip_root("/minizinc", "/minizincx/a.mzn"), None);
        assert_eq!(strip_root("/minizinc", "/usr/share/std.mzn"), None);
    }
}
