// src/path_util.rs
//! Path normalisation, joining and relative-path computation, used to
//! resolve manifest paths against the `--prefix` root. Reimplemented with
//! `std::path::Path` component iteration rather than the original's
//! character-by-character state machine.

use std::path::{Component, Path, PathBuf};

/// Collapses `.` and `..` components without touching the filesystem.
/// Leading `..` segments on a relative path are kept (there's nothing to
/// collapse them against); `..` cannot walk up past the root of an absolute
/// path.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let is_absolute = path.is_absolute();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => {
                        out.pop();
                        true
                    }
                    _ => false,
                };
                if !popped && !is_absolute {
                    out.push("..");
                }
            }
            Component::RootDir | Component::Prefix(_) | Component::Normal(_) => {
                out.push(component.as_os_str());
            }
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Joins `base` and `rel`, then normalises. An empty `base` returns `rel`
/// unchanged (normalised).
pub fn join(base: &Path, rel: &Path) -> PathBuf {
    if base.as_os_str().is_empty() {
        return normalize(rel);
    }
    normalize(&base.join(rel))
}

/// Resolves `to` to an absolute, normalised path. If `to` is already
/// absolute it is normalised directly; otherwise it is joined against
/// `from` (if given) and then the current working directory.
pub fn resolve(from: Option<&Path>, to: &Path) -> std::io::Result<PathBuf> {
    if to.is_absolute() {
        return Ok(normalize(to));
    }
    let joined = match from {
        Some(from) => join(from, to),
        None => to.to_path_buf(),
    };
    if joined.is_absolute() {
        return Ok(normalize(&joined));
    }
    let cwd = std::env::current_dir()?;
    Ok(normalize(&cwd.join(joined)))
}

/// Computes a relative path from `from` to `to`, by resolving both to
/// absolute paths and emitting `../` for every component of `from` beyond
/// their common prefix, followed by the remaining suffix of `to`.
pub fn relative(from: &Path, to: &Path) -> std::io::Result<PathBuf> {
    let from_abs = resolve(None, from)?;
    let to_abs = resolve(None, to)?;

    let from_components: Vec<_> = from_abs.components().collect();
    let to_components: Vec<_> = to_abs.components().collect();

    let common = from_components
        .iter()
        .zip(to_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..from_components.len() {
        out.push("..");
    }
    for component in &to_components[common..] {
        out.push(component.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    Ok(out)
}

/// The parent directory of `path`, or an empty path if there isn't one.
pub fn dirname(path: &Path) -> PathBuf {
    path.parent().map(PathBuf::from).unwrap_or_default()
}
