//! Cross-platform filesystem helpers
//!
//! - `normalize_path`: Strips Windows `\\?\` prefix from canonicalized paths
//! - `relative_slash_path`: Renders a path below a root with `/` separators
//! - `is_dir_empty`: Cheap emptiness check used by workspace provisioning

use std::io;
use std::path::{Component, Path, PathBuf};

/// Normalize Windows paths by removing the `\\?\` prefix if present.
///
/// On Windows, `Path::canonicalize()` returns paths with the extended-length path prefix
/// (`\\?\C:\...`), which breaks prefix comparisons against paths reported by the
/// OS watcher. This function strips the prefix on Windows while being a no-op on Unix.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use workspace_hub::fs_utils::normalize_path;
///
/// // On Unix, path is returned unchanged
/// let path = PathBuf::from("/app/workspace/alice");
/// assert_eq!(normalize_path(&path), path);
/// ```
pub fn normalize_path(path: &Path) -> PathBuf {
    #[cfg(windows)]
    {
        let s = path.to_string_lossy();
        // Handle UNC paths: \\?\UNC\server\share -> \\server\share
        if let Some(stripped) = s.strip_prefix(r"\\?\UNC\") {
            return PathBuf::from(format!(r"\\{}", stripped));
        }
        // Handle local paths: \\?\C:\path -> C:\path
        if let Some(stripped) = s.strip_prefix(r"\\?\") {
            return PathBuf::from(stripped);
        }
    }
    path.to_path_buf()
}

/// Render `path` relative to `root` using forward slashes.
///
/// Returns `None` when `path` is not below `root` or is `root` itself.
///
/// ```
/// use std::path::Path;
/// use workspace_hub::fs_utils::relative_slash_path;
///
/// let root = Path::new("/ws/alice");
/// assert_eq!(
///     relative_slash_path(root, Path::new("/ws/alice/docs/a.txt")).as_deref(),
///     Some("docs/a.txt")
/// );
/// assert_eq!(relative_slash_path(root, Path::new("/ws/bob/a.txt")), None);
/// ```
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Whether `dir` has no entries. A missing directory counts as empty.
pub fn is_dir_empty(dir: &Path) -> io::Result<bool> {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}
