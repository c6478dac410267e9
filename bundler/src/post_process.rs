//! Post-process, and two pieces of upkeep tightly coupled to it: breaking
//! hardlinks before an in-place edit (`ensure_writable`) and migrating
//! locale data into its own subtree so it can be split into a separate
//! extension later.

use anyhow::{Context, Result};
use manifest::BuildOptions;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Re-link every regular file under `app_dir` matching one of `patterns`
/// (the same literal/anchored/suffix matching rule cleanup patterns use)
/// onto a fresh inode, so further in-place edits do not mutate data shared
/// with the object store's cached blobs.
pub fn ensure_writable(app_dir: &Path, patterns: &[String]) -> Result<()> {
    if patterns.is_empty() {
        return Ok(());
    }
    for entry in WalkDir::new(app_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = match entry.path().strip_prefix(app_dir) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if !patterns.iter().any(|p| crate::cleanup::matches_pattern(relative, p)) {
            continue;
        }
        break_hardlink(entry.path())
            .with_context(|| format!("breaking hardlink on '{}'", entry.path().display()))?;
    }
    Ok(())
}

fn break_hardlink(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if meta.nlink() <= 1 {
            return Ok(());
        }
    }
    let _ = meta;
    let tmp = path.with_extension("bundler-writable-tmp");
    fs::copy(path, &tmp)?;
    fs::remove_file(path)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Move `share/locale` under `root` to `share/runtime/locale`, if present.
pub fn migrate_locales(root: &Path) -> Result<()> {
    let locale = root.join("share/locale");
    if !locale.is_dir() {
        return Ok(());
    }
    let dest_parent = root.join("share/runtime");
    fs::create_dir_all(&dest_parent)?;
    let dest = dest_parent.join("locale");
    if dest.exists() {
        return Ok(());
    }
    fs::rename(&locale, &dest).with_context(|| {
        format!(
            "migrating locales from '{}' to '{}'",
            locale.display(),
            dest.display()
        )
    })
}

/// Normalize every `.pyc`'s embedded mtime to match its source `.py`, so
/// byte-identical rebuilds produce byte-identical compiled output.
pub fn fix_python_timestamps(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pyc") {
            continue;
        }
        let py_path = py_source_for(path);
        let Some(py_path) = py_path else { continue };
        if !py_path.is_file() {
            continue;
        }
        let mtime = filetime::FileTime::from_last_modification_time(&py_path.metadata()?);
        filetime::set_file_mtime(path, mtime)
            .with_context(|| format!("setting mtime on '{}'", path.display()))?;
    }
    Ok(())
}

fn py_source_for(pyc_path: &Path) -> Option<std::path::PathBuf> {
    // `__pycache__/mod.cpython-3xx.pyc` -> `../mod.py`; plain `mod.pyc` ->
    // `mod.py` alongside it. Both layouts occur depending on interpreter
    // version, so both are checked.
    let stem = pyc_path.file_stem()?.to_str()?;
    if pyc_path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        == Some("__pycache__")
    {
        let module = stem.split('.').next()?;
        let src_dir = pyc_path.parent()?.parent()?;
        return Some(src_dir.join(format!("{module}.py")));
    }
    Some(pyc_path.with_extension("py"))
}

/// Split an ELF binary's debug symbols into `lib/debug/<path>.debug`.
fn split_debuginfo(root: &Path, relative: &Path, compress: bool) -> Result<()> {
    if which::which("objcopy").is_err() {
        log::warn!("objcopy not found on PATH; skipping debuginfo extraction");
        return Ok(());
    }
    let binary = root.join(relative);
    let debug_dir = root.join("lib/debug").join(relative.parent().unwrap_or(Path::new("")));
    fs::create_dir_all(&debug_dir)?;
    let debug_file = debug_dir.join(format!(
        "{}.debug",
        relative.file_name().and_then(|n| n.to_str()).unwrap_or("binary")
    ));

    let status = duct::cmd!(
        "objcopy",
        "--only-keep-debug",
        binary.as_os_str(),
        debug_file.as_os_str()
    )
    .unchecked()
    .run()
    .context("objcopy --only-keep-debug")?;
    if !status.status.success() {
        log::warn!("objcopy failed on '{}', skipping", binary.display());
        return Ok(());
    }
    let _ = duct::cmd!("objcopy", "--strip-debug", binary.as_os_str())
        .unchecked()
        .run();
    if compress {
        let _ = duct::cmd!("xz", "-f", debug_file.as_os_str()).unchecked().run();
    }
    Ok(())
}

fn strip_binary(path: &Path) -> Result<()> {
    if which::which("strip").is_err() {
        log::warn!("strip not found on PATH; skipping");
        return Ok(());
    }
    let _ = duct::cmd!("strip", "--strip-unneeded", path.as_os_str())
        .unchecked()
        .run();
    Ok(())
}

fn is_elf(path: &Path) -> bool {
    let Ok(mut bytes) = fs::read(path) else {
        return false;
    };
    bytes.truncate(4);
    bytes == [0x7f, b'E', b'L', b'F']
}

/// Run the post-process flags this module's (merged) build options select:
/// PY_TIMESTAMPS unless `no-python-timestamp-fix`; otherwise STRIP if
/// `strip` is set, else DEBUGINFO unless `no-debuginfo` (never both, and
/// never debuginfo for extensions).
pub fn post_process(root: &Path, options: &BuildOptions, no_python_timestamp_fix: bool, is_extension: bool) -> Result<()> {
    if !no_python_timestamp_fix {
        fix_python_timestamps(root).context("fixing python timestamps")?;
    }

    let strip = options.strip.unwrap_or(false);
    let no_debuginfo = options.no_debuginfo.unwrap_or(false);
    let compress = !options.no_debuginfo_compression.unwrap_or(false);

    if strip {
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && is_elf(entry.path()) {
                strip_binary(entry.path())?;
            }
        }
    } else if !no_debuginfo && !is_extension {
        let binaries: Vec<_> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_elf(e.path()))
            .collect();
        for entry in binaries {
            if let Ok(relative) = entry.path().strip_prefix(root) {
                split_debuginfo(root, relative, compress)?;
            }
        }
    }

    Ok(())
}
