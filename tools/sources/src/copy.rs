//! Recursive host-side directory copy shared by the `dir` and `git` source
//! kinds (and by `git`'s cache-to-build-dir export).

use crate::error::{self, CreateDirectorySnafu, ReadFileSnafu, WriteFileSnafu};
use snafu::ResultExt;
use std::path::Path;
use walkdir::WalkDir;

/// Copy every file under `src` into `dest`, preserving relative structure.
/// `skip` is called with the entry's path relative to `src`; entries
/// (files or directories) for which it returns `true` are omitted.
pub fn copy_tree(src: &Path, dest: &Path, skip: impl Fn(&Path) -> bool) -> error::Result<()> {
    std::fs::create_dir_all(dest).context(CreateDirectorySnafu {
        path: dest.to_path_buf(),
    })?;

    for entry in WalkDir::new(src).into_iter().filter_map(|e| e.ok()) {
        let relative = match entry.path().strip_prefix(src) {
            Ok(r) if !r.as_os_str().is_empty() => r,
            _ => continue,
        };
        if skip(relative) {
            continue;
        }
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).context(CreateDirectorySnafu { path: target })?;
        } else if entry.file_type().is_symlink() {
            let link = std::fs::read_link(entry.path()).context(ReadFileSnafu {
                path: entry.path().to_path_buf(),
            })?;
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).context(CreateDirectorySnafu {
                    path: parent.to_path_buf(),
                })?;
            }
            let _ = std::fs::remove_file(&target);
            symlink(&link, &target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).context(CreateDirectorySnafu {
                    path: parent.to_path_buf(),
                })?;
            }
            std::fs::copy(entry.path(), &target).context(WriteFileSnafu { path: target })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> error::Result<()> {
    std::os::unix::fs::symlink(target, link).context(WriteFileSnafu {
        path: link.to_path_buf(),
    })
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> error::Result<()> {
    unimplemented!("the sandbox driver this tool wraps is unix-only")
}

/// A glob-free matcher mirroring the cleanup-pattern matching rules used
/// elsewhere: a pattern matches a relative path if it is literal-equal, or
/// (when anchored with a leading `/`) matches from the root, or otherwise
/// matches any path suffix.
pub fn matches_skip_pattern(path: &Path, pattern: &str) -> bool {
    let path_str = path.to_string_lossy();
    if let Some(anchored) = pattern.strip_prefix('/') {
        path_str == anchored
    } else {
        path_str == pattern || path_str.ends_with(&format!("/{pattern}"))
    }
}
