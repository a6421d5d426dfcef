use std::path::{Component, Path};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("container path is empty")]
    Empty,
    #[error("container path contains an unsupported component")]
    UnsupportedComponent,
}

/// Normalize a container-relative path to `a/b/c` form. Leading slashes and
/// `.` segments are stripped; `..` and platform prefixes are rejected.
pub(crate) fn normalize(path: &str) -> Result<String, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => {
                parts.push(part.to_str().ok_or(PathError::UnsupportedComponent)?)
            }
            Component::RootDir | Component::CurDir => continue,
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent);
            }
        }
    }
    if parts.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(parts.join("/"))
}

/// Listing roots additionally accept `""` and `"/"`, both meaning the
/// container root.
pub(crate) fn normalize_root(path: &str) -> Result<String, PathError> {
    if path.is_empty() || path == "/" {
        return Ok(String::new());
    }
    normalize(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_slash_and_cur_dir() {
        assert_eq!(normalize("/Docs/./A.txt").unwrap(), "Docs/A.txt");
        assert_eq!(normalize("Docs/A.txt").unwrap(), "Docs/A.txt");
    }

    #[test]
    fn rejects_parent_dir() {
        assert_eq!(normalize("../secret"), Err(PathError::UnsupportedComponent));
        assert_eq!(
            normalize("Docs/../secret"),
            Err(PathError::UnsupportedComponent)
        );
    }

    #[test]
    fn rejects_empty_paths() {
        assert_eq!(normalize(""), Err(PathError::Empty));
        assert_eq!(normalize("/"), Err(PathError::Empty));
    }

    #[test]
    fn root_listing_accepts_empty_and_slash() {
        assert_eq!(normalize_root("").unwrap(), "");
        assert_eq!(normalize_root("/").unwrap(), "");
        assert_eq!(normalize_root("/Docs").unwrap(), "Docs");
    }
}
