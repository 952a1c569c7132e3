//! Path helpers for mount point matching and snapshot rebasing
//!
//! Mount points are compared as strings that always end with a path
//! separator, so a plain prefix test never matches half a component.

use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

use crate::error::{Error, Result};

/// Make `path` absolute and lexically clean (`.` and `..` resolved)
///
/// Verbatim `\\?\` prefixes are stripped unless the path is a file share.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let cleaned = clean(&joined);
    let text = cleaned.to_string_lossy();
    if let Some(rest) = text.strip_prefix(r"\\?\") {
        if !rest.starts_with(r"UNC\") {
            return Ok(PathBuf::from(rest));
        }
    }

    Ok(cleaned)
}

/// Resolve `.` and `..` without touching the filesystem
pub fn clean(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(
                    result.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                ) {
                    result.pop();
                }
            }
            other => result.push(other.as_os_str()),
        }
    }
    result
}

/// Append the platform separator unless already present
pub fn with_separator_suffix(path: &str) -> String {
    if path.ends_with(MAIN_SEPARATOR) || path.ends_with(['/', '\\']) {
        path.to_string()
    } else {
        format!("{}{}", path, MAIN_SEPARATOR)
    }
}

/// Volume key of a path: the drive or share prefix on Windows, empty elsewhere
pub fn volume_name(path: &str) -> String {
    match Path::new(path).components().next() {
        Some(Component::Prefix(prefix)) => prefix.as_os_str().to_string_lossy().to_string(),
        _ => String::new(),
    }
}

/// Move `path` from under `old_base` to the same place under `new_base`
pub fn change_base_dir(path: &str, old_base: &str, new_base: &str) -> Result<PathBuf> {
    let relative = Path::new(path).strip_prefix(old_base).map_err(|_| {
        Error::Internal(format!("{} is not inside {}", path, old_base))
    })?;

    Ok(Path::new(new_base).join(relative))
}

/// Path of `path` relative to `base`, when `path` is inside it
pub fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(Path::to_path_buf)
}
