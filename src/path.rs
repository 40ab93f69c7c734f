// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Every path handed around by the engine is absolute and lexically
//! normalized: no `.` or `..` components, and no trailing separator.
//! Symlinks are never resolved, because a symlinked path inside a dataset
//! belongs to the dataset it is written under, not to wherever it points.

use std::{
    io,
    path::{Component, Path, PathBuf, MAIN_SEPARATOR},
};

/// Determine default absolute path to the engine configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/nestds/config.toml`. Does
/// not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if configuration directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("nestds").join("config.toml"))
        .ok_or(NoWayHome)
}

/// Lexically normalize a path.
///
/// Collapses `.` components, resolves `..` against the preceding component,
/// and drops any trailing separator. Never touches the file system.
pub fn normalize(path: impl AsRef<Path>) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.as_ref().components() {
        match component {
            Component::CurDir => continue,
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // INVARIANT: Never climb above the root.
                Some(Component::RootDir | Component::Prefix(_)) => continue,
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }

    if out.as_os_str().is_empty() {
        out.push(".");
    }

    out
}

/// Make path absolute against `base` if it is relative, then normalize it.
pub fn resolve_against(path: impl AsRef<Path>, base: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(base.as_ref().join(path))
    }
}

/// Make path absolute against the current working directory.
///
/// # Errors
///
/// - Return [`io::Error`] if current working directory cannot be read.
pub fn resolve_against_cwd(path: impl AsRef<Path>) -> io::Result<PathBuf> {
    Ok(resolve_against(path, std::env::current_dir()?))
}

/// Check if `path` is `base` itself or located somewhere underneath it.
///
/// Both paths are expected to be normalized.
pub fn is_at_or_under(path: impl AsRef<Path>, base: impl AsRef<Path>) -> bool {
    path.as_ref().starts_with(base.as_ref())
}

/// Check if `path` is located strictly underneath `base`.
pub fn is_under(path: impl AsRef<Path>, base: impl AsRef<Path>) -> bool {
    let (path, base) = (path.as_ref(), base.as_ref());
    path != base && path.starts_with(base)
}

/// Path of `path` relative to `base`, if `path` is at or under `base`.
///
/// Returns an empty path when both are equal.
pub fn relative_to(path: impl AsRef<Path>, base: impl AsRef<Path>) -> Option<PathBuf> {
    path.as_ref()
        .strip_prefix(base.as_ref())
        .ok()
        .map(Path::to_path_buf)
}

/// Check if raw user request addresses the _content_ of a directory.
///
/// Mirrors rsync semantics: `"sub/"`, `"sub/."`, and `"."` mean "what is in
/// sub", while `"sub"` means the mount point itself.
pub fn requests_content(orig_request: &str) -> bool {
    let curdir_suffix = format!("{MAIN_SEPARATOR}.");
    orig_request == "."
        || orig_request.ends_with(MAIN_SEPARATOR)
        || orig_request.ends_with('/')
        || orig_request.ends_with(&curdir_suffix)
        || orig_request.ends_with("/.")
}

/// No way to determine user's configuration directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's configuration directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
