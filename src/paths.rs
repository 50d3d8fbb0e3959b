//! Workspace path resolution and user identifier validation
//!
//! Every path a client sends (list, read, write, delete, upload) is resolved
//! here against the user's workspace root before any storage is touched.
//! Nothing downstream re-validates, so the check in [`resolve_in_root`] is
//! the only traversal defense.
//!
//! Resolution follows the usual non-strict canonicalization rules: the
//! existing part of the path has its symlinks resolved, `..` segments are
//! applied to the resolved prefix, and components that do not exist yet are
//! appended as-is. This lets write and upload target files that are about
//! to be created.

use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::fs_utils::normalize_path;
use crate::{Result, WorkspaceError};

/// Identifier used when a request carries no user header
pub const DEFAULT_USER_ID: &str = "default";

/// Upper bound on chained symlinks followed while resolving a dangling link
const MAX_LINK_HOPS: usize = 40;

static USER_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));

/// Check that a user identifier only contains ASCII alphanumerics, `-` and `_`.
pub fn is_valid_user_id(user_id: &str) -> bool {
    USER_ID_PATTERN.is_match(user_id)
}

/// Validate a user identifier, returning it unchanged on success.
pub fn validate_user_id(user_id: &str) -> Result<&str> {
    if is_valid_user_id(user_id) {
        Ok(user_id)
    } else {
        Err(WorkspaceError::InvalidUserId {
            user_id: user_id.to_string(),
        })
    }
}

/// Resolve a client-supplied relative path inside `root`.
///
/// - `""`, `"."` and strings made only of `/` resolve to the canonical root.
/// - Leading `/` characters are stripped, so `"/a/b"` means `a/b` in the root.
/// - The result must be the canonical root or lie beneath it; anything else
///   fails with [`WorkspaceError::PathTraversal`].
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use workspace_hub::paths::resolve_in_root;
///
/// let root = Path::new("/app/workspace/alice");
/// let file = resolve_in_root("notes/todo.md", root)?;
/// assert!(file.starts_with(root.canonicalize()?));
///
/// assert!(resolve_in_root("../bob/secret.txt", root).is_err());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn resolve_in_root(relative: &str, root: &Path) -> Result<PathBuf> {
    let canonical_root = normalize_path(&root.canonicalize()?);

    let trimmed = relative.trim_start_matches('/');
    if relative.is_empty() || relative == "." || trimmed.is_empty() {
        return Ok(canonical_root);
    }

    let mut resolved = canonical_root.clone();
    for component in Path::new(trimmed).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                // Follow symlinks for the part of the path that exists
                if resolved.symlink_metadata().is_ok() {
                    resolved = follow_link(resolved, MAX_LINK_HOPS)?;
                }
            }
            // A drive prefix or root after trimming means an absolute path
            Component::Prefix(_) | Component::RootDir => {
                return Err(WorkspaceError::PathTraversal {
                    input: relative.to_string(),
                    resolved: PathBuf::from(trimmed),
                });
            }
        }
    }

    if !resolved.starts_with(&canonical_root) {
        return Err(WorkspaceError::PathTraversal {
            input: relative.to_string(),
            resolved,
        });
    }

    Ok(resolved)
}

/// Canonicalize an existing entry.
///
/// A dangling symlink cannot be canonicalized, so its target is resolved
/// against the link's parent instead, following further links that exist.
fn follow_link(path: PathBuf, hops: usize) -> Result<PathBuf> {
    let err = match path.canonicalize() {
        Ok(canonical) => return Ok(normalize_path(&canonical)),
        Err(e) => e,
    };
    let target = match std::fs::read_link(&path) {
        Ok(target) if hops > 0 => target,
        _ => return Err(err.into()),
    };

    let mut resolved = path.parent().map(Path::to_path_buf).unwrap_or_default();
    for component in target.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                if resolved.symlink_metadata().is_ok() {
                    resolved = follow_link(resolved, hops - 1)?;
                }
            }
            // An absolute target replaces everything resolved so far
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
        }
    }
    Ok(resolved)
}

/// Like [`resolve_in_root`], but refuses to hand back the root itself.
///
/// Used by destructive operations (delete) where targeting the whole
/// workspace is never legitimate.
pub fn resolve_strictly_inside(relative: &str, root: &Path) -> Result<PathBuf> {
    let resolved = resolve_in_root(relative, root)?;
    if resolved == normalize_path(&root.canonicalize()?) {
        return Err(WorkspaceError::PathTraversal {
            input: relative.to_string(),
            resolved,
        });
    }
    Ok(resolved)
}

/// Check if a path exists and is a directory.
///
/// Returns Ok(path) if valid directory, Err otherwise.
pub fn ensure_directory(path: &Path) -> Result<&Path> {
    if !path.exists() {
        return Err(WorkspaceError::NotFound {
            path: path.display().to_string(),
        });
    }
    if !path.is_dir() {
        return Err(WorkspaceError::NotADirectory {
            path: path.display().to_string(),
        });
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("docs/nested")).unwrap();
        fs::write(dir.path().join("docs/readme.md"), "hi").unwrap();
        dir
    }

    #[test]
    fn test_empty_and_dot_resolve_to_root() {
        let ws = workspace();
        let root = ws.path().canonicalize().unwrap();

        assert_eq!(resolve_in_root("", ws.path()).unwrap(), root);
        assert_eq!(resolve_in_root(".", ws.path()).unwrap(), root);
        assert_eq!(resolve_in_root("///", ws.path()).unwrap(), root);
    }

    #[test]
    fn test_leading_slashes_are_relative() {
        let ws = workspace();
        let root = ws.path().canonicalize().unwrap();

        let resolved = resolve_in_root("/docs/readme.md", ws.path()).unwrap();
        assert_eq!(resolved, root.join("docs/readme.md"));
    }

    #[test]
    fn test_nonexistent_targets_resolve_under_root() {
        let ws = workspace();
        let root = ws.path().canonicalize().unwrap();

        let resolved = resolve_in_root("docs/new/file.txt", ws.path()).unwrap();
        assert_eq!(resolved, root.join("docs/new/file.txt"));
    }

    #[test]
    fn test_inner_parent_segments_are_allowed() {
        let ws = workspace();
        let root = ws.path().canonicalize().unwrap();

        let resolved = resolve_in_root("docs/nested/../readme.md", ws.path()).unwrap();
        assert_eq!(resolved, root.join("docs/readme.md"));
    }

    #[test]
    fn test_escaping_parent_segments_fail() {
        let ws = workspace();

        for input in ["..", "../x", "docs/../../x", "docs/nested/../../../etc/passwd"] {
            let err = resolve_in_root(input, ws.path()).unwrap_err();
            assert!(
                matches!(err, WorkspaceError::PathTraversal { .. }),
                "{input} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn test_sibling_with_common_prefix_is_rejected() {
        let base = TempDir::new().unwrap();
        let alice = base.path().join("alice");
        let alice2 = base.path().join("alice2");
        fs::create_dir_all(&alice).unwrap();
        fs::create_dir_all(&alice2).unwrap();

        let err = resolve_in_root("../alice2/file", &alice).unwrap_err();
        assert!(matches!(err, WorkspaceError::PathTraversal { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_is_rejected() {
        let ws = workspace();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), ws.path().join("escape")).unwrap();

        let err = resolve_in_root("escape/secret", ws.path()).unwrap_err();
        match err {
            WorkspaceError::PathTraversal { input, resolved } => {
                assert_eq!(input, "escape/secret");
                assert!(resolved.starts_with(outside.path().canonicalize().unwrap()));
            }
            other => panic!("expected traversal, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_out_of_root_is_rejected() {
        let ws = workspace();
        let outside = TempDir::new().unwrap();
        let not_yet = outside.path().join("not_yet");
        std::os::unix::fs::symlink(&not_yet, ws.path().join("escape")).unwrap();
        std::os::unix::fs::symlink("../../../elsewhere", ws.path().join("docs/nested/up")).unwrap();

        for input in ["escape", "escape/child", "docs/nested/up"] {
            let err = resolve_in_root(input, ws.path()).unwrap_err();
            assert!(
                matches!(err, WorkspaceError::PathTraversal { .. }),
                "{input} should be rejected, got {err:?}"
            );
        }
        match resolve_in_root("escape", ws.path()).unwrap_err() {
            WorkspaceError::PathTraversal { resolved, .. } => {
                assert_eq!(resolved, outside.path().canonicalize().unwrap().join("not_yet"));
            }
            other => panic!("expected traversal, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_inside_root_resolves() {
        let ws = workspace();
        let root = ws.path().canonicalize().unwrap();
        std::os::unix::fs::symlink("docs/later.md", ws.path().join("link")).unwrap();

        let resolved = resolve_in_root("link", ws.path()).unwrap();
        assert_eq!(resolved, root.join("docs/later.md"));
    }

    #[test]
    fn test_strictly_inside_refuses_root() {
        let ws = workspace();
        assert!(resolve_strictly_inside("", ws.path()).is_err());
        assert!(resolve_strictly_inside("docs/..", ws.path()).is_err());
        assert!(resolve_strictly_inside("docs", ws.path()).is_ok());
    }

    #[test]
    fn test_user_id_validation() {
        assert!(is_valid_user_id("alice"));
        assert!(is_valid_user_id("3f2b-9c_01"));
        assert!(is_valid_user_id(DEFAULT_USER_ID));

        assert!(!is_valid_user_id(""));
        assert!(!is_valid_user_id("../etc"));
        assert!(!is_valid_user_id("a b"));
        assert!(!is_valid_user_id("alice/bob"));
        assert!(!is_valid_user_id("ユーザー"));
        assert!(validate_user_id("bad.id").is_err());
    }

    #[test]
    fn test_ensure_directory() {
        let ws = workspace();
        assert!(ensure_directory(ws.path()).is_ok());
        assert!(matches!(
            ensure_directory(&ws.path().join("docs/readme.md")),
            Err(WorkspaceError::NotADirectory { .. })
        ));
        assert!(matches!(
            ensure_directory(&ws.path().join("missing")),
            Err(WorkspaceError::NotFound { .. })
        ));
    }
}
