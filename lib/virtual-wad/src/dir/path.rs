use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Lexically normalise `path`: drop `.` components and fold `..` into the
/// preceding component where there is one. Leading `..` of a relative path
/// are kept; `..` at the root is dropped.
pub fn sanitize_path(path: &Path) -> PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        PathBuf::from(c.as_os_str())
    } else {
        PathBuf::new()
    };

    for component in components {
        match component {
            Component::Prefix(..) => {}
            Component::RootDir => {
                ret.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => match ret.components().next_back() {
                Some(Component::Normal(_)) => {
                    ret.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(..)) => {}
                _ => ret.push(".."),
            },
            Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    if ret.as_os_str().is_empty() {
        ret.push(".");
    }
    ret
}

/// The directory containing `path`, or `.` for a bare relative name.
pub fn parent_path(path: &Path) -> PathBuf {
    sanitize_path(&path.join(".."))
}

/// Whether `path` ends in `.wad`, ignoring case.
pub fn has_wad_extension(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wad"))
}
