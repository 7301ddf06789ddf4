//! Lexical path normalization

use std::path::{Component, Path, PathBuf};

/// Collapse `.` and `..` components without touching the file system.
///
/// Symlinks are kept as written so that tracked paths match the paths the
/// watch primitive reports.
pub fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                ) && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
