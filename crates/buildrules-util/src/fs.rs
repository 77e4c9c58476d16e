//! Filesystem utilities for buildrules.
//!
//! Every helper here is safe to repeat: creating an existing directory,
//! removing an absent path or copying over a previous copy all succeed.

use std::path::{Path, PathBuf};

use crate::error::UtilError;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> UtilError + '_ {
    move |source| UtilError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Create a directory and all parent directories if they do not exist.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> Result<(), UtilError> {
    std::fs::create_dir_all(path).map_err(io_error(path))
}

/// Remove a directory and all its contents. No error if the directory is absent.
///
/// # Errors
/// Returns an error if the directory exists but cannot be removed.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<(), UtilError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(UtilError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Remove a file, symlink or directory tree. No error if nothing is there.
///
/// # Errors
/// Returns an error if the path exists but cannot be removed.
pub fn remove_path_if_exists(path: &Path) -> Result<(), UtilError> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(UtilError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    if meta.is_dir() {
        remove_dir_all_if_exists(path)
    } else {
        std::fs::remove_file(path).map_err(io_error(path))
    }
}

/// Copy `src` to `dest`, replacing any existing file.
///
/// The data is written to a temporary sibling first and renamed into place,
/// so `dest` is either the old file or the complete new one.
///
/// # Errors
/// Returns an error if the copy or the rename fails.
pub fn copy_file(src: &Path, dest: &Path) -> Result<(), UtilError> {
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }
    let tmp = partial_path(dest);
    remove_path_if_exists(&tmp)?;
    std::fs::copy(src, &tmp).map_err(io_error(src))?;
    std::fs::rename(&tmp, dest).map_err(io_error(dest))
}

/// Write `contents` to `path` through a temporary sibling and a rename.
///
/// # Errors
/// Returns an error if the parent directory cannot be created or the write
/// or rename fails.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), UtilError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = partial_path(path);
    std::fs::write(&tmp, contents).map_err(io_error(&tmp))?;
    std::fs::rename(&tmp, path).map_err(io_error(path))
}

/// Copy the directory tree `src` to `dest`, replacing any previous `dest`.
///
/// Regular files keep their permissions and symlinks are recreated as
/// symlinks. The tree is assembled under a temporary sibling and renamed
/// into place once complete, so an interrupted copy never leaves a partial
/// tree at `dest`.
///
/// # Errors
/// Returns an error if `src` cannot be walked or any entry cannot be copied.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<(), UtilError> {
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }
    let tmp = partial_path(dest);
    remove_path_if_exists(&tmp)?;

    for entry in walkdir::WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| UtilError::Io {
            path: src.display().to_string(),
            source: e.into(),
        })?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = tmp.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            ensure_dir(&target)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path()).map_err(io_error(entry.path()))?;
            symlink(&link, &target)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(io_error(entry.path()))?;
        }
    }

    remove_path_if_exists(dest)?;
    std::fs::rename(&tmp, dest).map_err(io_error(dest))
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> Result<(), UtilError> {
    std::os::unix::fs::symlink(link, target).map_err(io_error(target))
}

#[cfg(not(unix))]
fn symlink(link: &Path, target: &Path) -> Result<(), UtilError> {
    std::fs::copy(link, target)
        .map(|_| ())
        .map_err(io_error(target))
}

fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.partial"))
}

/// Remove every file under `dir` matching the glob `pattern`.
///
/// Returns how many files were removed. A missing `dir` removes nothing.
///
/// # Errors
/// Returns an error if the pattern is invalid or a match cannot be removed.
pub fn remove_matching(dir: &Path, pattern: &str) -> Result<usize, UtilError> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let full_pattern = dir.join(pattern).display().to_string();
    let paths = glob::glob(&full_pattern).map_err(|e| UtilError::GlobPattern {
        pattern: full_pattern.clone(),
        message: e.to_string(),
    })?;

    let mut removed = 0usize;
    for path in paths.filter_map(Result::ok).filter(|p| p.is_file()) {
        std::fs::remove_file(&path).map_err(io_error(&path))?;
        removed = removed.saturating_add(1);
    }
    Ok(removed)
}

/// Return the buildrules home directory (`~/.buildrules`).
///
/// Resolves via `HOME` (Unix) or `USERPROFILE` (Windows).
///
/// # Errors
/// Returns an error if neither environment variable is set.
pub fn buildrules_home() -> Result<PathBuf, UtilError> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(".buildrules"))
        .map_err(|_| UtilError::NoHomeDir)
}
