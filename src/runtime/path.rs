//! Lexical path helpers shared by the exposure layer and the install layout.

use std::path::{Component, Path, PathBuf};

/// Normalize a path by processing `.` and `..` components lexically.
/// This does not access the filesystem and does not follow symlinks.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` above the root or at the start of a relative path is kept
                if !result.pop() {
                    result.push(component);
                }
            }
            _ => result.push(component),
        }
    }
    result
}

/// Whether `path` lies under `dir` once both are normalized. Comparison is
/// per component, so `/root/ab` is not under `/root/a`.
pub fn is_path_under(path: &Path, dir: &Path) -> bool {
    normalize_path(path).starts_with(normalize_path(dir))
}

/// Relative path from a symlink location to its target, used so the exposure
/// directory keeps working when the whole root is moved.
///
/// A link at `/root/bin/rg` pointing to `/root/packages/cargo/ripgrep/bin/rg`
/// yields `../packages/cargo/ripgrep/bin/rg`.
///
/// Returns `None` when no relative path exists (e.g. different drives on Windows).
pub fn relative_symlink_path(from_link: &Path, to_target: &Path) -> Option<PathBuf> {
    let from_dir = from_link.parent()?;
    let result = pathdiff::diff_paths(to_target, from_dir)?;

    if result.is_absolute() {
        return None;
    }

    Some(result)
}
