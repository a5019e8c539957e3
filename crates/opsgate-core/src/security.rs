//! Path-traversal protection for file-handling tools.
//!
//! Every file path supplied by a caller goes through `sanitize_path` and
//! `validate_path_within_root` before it is used. Violations are surfaced
//! as [`SecurityError`]; the dispatcher turns them into a
//! `security_violation` audit record plus a critical notification.

use std::path::{Component, Path, PathBuf};

use crate::errors::SecurityError;

/// Maximum accepted path length in bytes.
const MAX_PATH_LEN: usize = 4096;

/// Strip NUL, CR and LF from a supplied path and enforce the length cap.
pub fn sanitize_path(raw: &str) -> Result<String, SecurityError> {
    if raw.len() > MAX_PATH_LEN {
        return Err(SecurityError::InvalidPath(format!(
            "path too long ({} bytes, limit {})",
            raw.len(),
            MAX_PATH_LEN
        )));
    }
    let cleaned: String = raw.chars().filter(|c| !matches!(c, '\0' | '\r' | '\n')).collect();
    if cleaned.is_empty() {
        return Err(SecurityError::InvalidPath("path is empty".to_string()));
    }
    Ok(cleaned)
}

/// Validate that `path` resolves inside `root`.
///
/// Relative paths are joined onto the canonical root; symlinks are
/// resolved where the filesystem allows. The result is accepted iff it
/// equals the root or begins with `root + separator`.
pub fn validate_path_within_root(
    path: &str,
    root: &Path,
    operation: &str,
) -> Result<PathBuf, SecurityError> {
    if path.is_empty() {
        return Err(SecurityError::InvalidPath("path is empty".to_string()));
    }

    let abs_root = resolve_lexical(&std::env::current_dir().unwrap_or_default(), root);
    let abs_root = std::fs::canonicalize(&abs_root).unwrap_or(abs_root);

    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        abs_root.join(candidate)
    };

    // Resolve symlinks when the target exists; otherwise fall back to the
    // lexically normalized form so `..` components still cannot escape.
    let resolved = std::fs::canonicalize(&joined)
        .unwrap_or_else(|_| resolve_lexical(&abs_root, &joined));

    if resolved == abs_root || resolved.starts_with(&abs_root) {
        tracing::debug!(
            operation,
            path,
            resolved = %resolved.display(),
            "path validation passed"
        );
        Ok(resolved)
    } else {
        Err(SecurityError::PathTraversal {
            attempted: path.to_string(),
            root: abs_root.display().to_string(),
        })
    }
}

/// Lexically normalize a path against a base, collapsing `.` and `..`.
fn resolve_lexical(base: &Path, path: &Path) -> PathBuf {
    let mut out = if path.is_absolute() {
        PathBuf::new()
    } else {
        base.to_path_buf()
    };
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                out = PathBuf::from(std::path::MAIN_SEPARATOR.to_string());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_control_characters() {
        assert_eq!(sanitize_path("a\r\nb\0.md").unwrap(), "ab.md");
    }

    #[test]
    fn sanitize_rejects_oversized_paths() {
        let long = "a".repeat(MAX_PATH_LEN + 1);
        assert!(matches!(
            sanitize_path(&long),
            Err(SecurityError::InvalidPath(_))
        ));
    }

    #[test]
    fn relative_path_inside_root_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let resolved =
            validate_path_within_root("post.md", dir.path(), "stage").unwrap();
        assert!(resolved.starts_with(std::fs::canonicalize(dir.path()).unwrap()));
    }

    #[test]
    fn parent_escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            validate_path_within_root("../../../etc/shadow", dir.path(), "stage").unwrap_err();
        assert!(matches!(err, SecurityError::PathTraversal { .. }));
        assert_eq!(err.kind(), "path_traversal");
    }

    #[test]
    fn absolute_path_outside_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_path_within_root("/etc/shadow", dir.path(), "stage").unwrap_err();
        assert!(matches!(err, SecurityError::PathTraversal { .. }));
    }

    #[test]
    fn symlink_escape_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("secret.md");
        std::fs::write(&target, "x").unwrap();
        let link = root.path().join("inside.md");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        let err = validate_path_within_root("inside.md", root.path(), "stage").unwrap_err();
        assert!(matches!(err, SecurityError::PathTraversal { .. }));
    }

    #[test]
    fn root_itself_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let resolved = validate_path_within_root(root, dir.path(), "stage").unwrap();
        assert_eq!(resolved, std::fs::canonicalize(dir.path()).unwrap());
    }
}
