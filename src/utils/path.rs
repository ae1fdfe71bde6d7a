//! Lexical path helpers. Nothing here touches the file system, so paths of files that do
//! not exist yet are normalized the same way as existing ones.

use std::path::{Component, Path, PathBuf};

/// Makes `path` absolute against `base` if it is relative, and folds `.` and `..`
/// components.
pub fn absolute<P: AsRef<Path>>(base: &Path, path: P) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Folds `.` and `..` components of `path` without resolving symbolic links.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root.
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }

    out
}

/// Returns `path` relative to `root` if it lives under it.
pub fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    path.strip_prefix(root).ok().map(|v| v.to_path_buf())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fold() {
        let base = Path::new("/work/game");
        assert_eq!(absolute(base, "a/./b"), PathBuf::from("/work/game/a/b"));
        assert_eq!(absolute(base, "../res/x"), PathBuf::from("/work/res/x"));
        assert_eq!(absolute(base, "/abs/../y"), PathBuf::from("/y"));
        assert_eq!(absolute(base, "/../z"), PathBuf::from("/z"));
    }

    #[test]
    fn relative() {
        let root = Path::new("/work");
        assert_eq!(
            relative_to(root, Path::new("/work/a/b")),
            Some(PathBuf::from("a/b"))
        );
        assert_eq!(relative_to(root, Path::new("/other")), None);
    }
}
