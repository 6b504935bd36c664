use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("path escapes its root: {0}")]
pub struct PathEscape(pub String);

/// Map a remote absolute path onto `root`.
///
/// Leading `/` and `.` components are dropped. Any `..` is rejected rather
/// than normalized, so the result always stays below `root`.
pub fn resolve_under(root: &Path, remote: &str) -> Result<PathBuf, PathEscape> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(remote).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => resolved.push(part),
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PathEscape(remote.to_string()))
            }
        }
    }
    Ok(resolved)
}
