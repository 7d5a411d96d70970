//! Start locations for the upward directory walks.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Absolute, lexically normalised form of `path`.
///
/// Relative paths are joined onto the working directory, `.` components are
/// dropped and `..` removes the component before it, so `ancestors()` of the
/// result yields each true ancestor exactly once. Symlinks are not resolved.
pub fn normalize_start(path: &Path) -> io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_components_are_folded() {
        assert_eq!(
            normalize_start(Path::new("/r/b/../x/./sub")).unwrap(),
            PathBuf::from("/r/x/sub")
        );
    }

    #[test]
    fn parent_of_root_stays_root() {
        assert_eq!(
            normalize_start(Path::new("/../../etc")).unwrap(),
            PathBuf::from("/etc")
        );
    }

    #[test]
    fn ancestors_of_normalized_path_are_unique() {
        let path = normalize_start(Path::new("/r/b/../x")).unwrap();
        let ancestors: Vec<_> = path.ancestors().collect();
        assert_eq!(
            ancestors,
            vec![Path::new("/r/x"), Path::new("/r"), Path::new("/")]
        );
    }

    #[test]
    fn relative_paths_are_anchored_at_cwd() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(normalize_start(Path::new("a/..")).unwrap(), cwd);
    }
}
