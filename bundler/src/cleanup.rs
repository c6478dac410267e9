//! Cleanup-pattern expansion and the rename-icon/appdata/desktop-file
//! rules of the cleanup stage.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A pattern matches a relative path if it is literal-equal, or (anchored
/// with a leading `/`) matches from the root, or otherwise matches any
/// path suffix; `*`/`?` in any segment behave as shell globs.
pub fn matches_pattern(path: &Path, pattern: &str) -> bool {
    let path_str = path.to_string_lossy();
    if let Some(anchored) = pattern.strip_prefix('/') {
        glob_match(&path_str, anchored)
    } else if glob_match(&path_str, pattern) {
        true
    } else {
        // Suffix match: the pattern may match starting at any path
        // component, not just the root.
        let mut rest = path_str.as_ref();
        loop {
            match rest.find('/') {
                Some(idx) => {
                    rest = &rest[idx + 1..];
                    if glob_match(rest, pattern) {
                        return true;
                    }
                }
                None => return false,
            }
        }
    }
}

fn glob_match(text: &str, pattern: &str) -> bool {
    if !pattern.contains(['*', '?']) {
        return text == pattern;
    }
    let mut regex_str = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => regex_str.push_str(".*"),
            '?' => regex_str.push('.'),
            c if "\\.+()|[]{}^$".contains(c) => {
                regex_str.push('\\');
                regex_str.push(c);
            }
            c => regex_str.push(c),
        }
    }
    regex_str.push('$');
    regex::Regex::new(&regex_str).map(|re| re.is_match(text)).unwrap_or(false)
}

/// Every path under `root` matching one of `patterns`, plus the
/// debug-info counterpart `lib/debug/<p>.debug` for any matched path `p`
/// whose ancestor also matches, sorted so that deletion in reverse order
/// removes leaves before their parent directories.
pub fn expand(root: &Path, patterns: &[String]) -> Vec<PathBuf> {
    if patterns.is_empty() {
        return Vec::new();
    }
    let mut matched: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        let relative = match entry.path().strip_prefix(root) {
            Ok(r) if !r.as_os_str().is_empty() => r.to_path_buf(),
            _ => continue,
        };
        if patterns.iter().any(|p| matches_pattern(&relative, p)) {
            matched.push(relative);
        }
    }

    let mut debug_extra = Vec::new();
    for entry in WalkDir::new(root.join("lib/debug"))
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(debug_relative) = entry.path().strip_prefix(root).ok() else {
            continue;
        };
        let Some(inner) = debug_relative
            .to_string_lossy()
            .strip_prefix("lib/debug/")
            .and_then(|s| s.strip_suffix(".debug"))
            .map(PathBuf::from)
        else {
            continue;
        };
        if inner
            .ancestors()
            .any(|a| !a.as_os_str().is_empty() && matched.iter().any(|m| m == a))
        {
            debug_extra.push(debug_relative.to_path_buf());
        }
    }
    matched.extend(debug_extra);

    matched.sort();
    matched
}

/// Delete every matched path in reverse sorted order, then remove any
/// directory left empty by the deletions.
pub fn apply(root: &Path, matched: &[PathBuf]) -> Result<()> {
    for relative in matched.iter().rev() {
        let path = root.join(relative);
        if path.is_dir() {
            let _ = std::fs::remove_dir(&path);
        } else {
            let _ = std::fs::remove_file(&path);
        }
    }
    remove_empty_dirs(root)
}

fn remove_empty_dirs(root: &Path) -> Result<()> {
    let mut dirs: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.path().to_path_buf())
        .collect();
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        if dir == root {
            continue;
        }
        if std::fs::read_dir(&dir).map(|mut it| it.next().is_none()).unwrap_or(false) {
            let _ = std::fs::remove_dir(&dir);
        }
    }
    Ok(())
}

/// Rename `share/icons/**/<rename_icon>(-symbolic)?.<ext>` to the same
/// shape under `id`. Files elsewhere that merely share the base name are
/// left alone: this is an icon-tree rename, not a general string
/// substitution.
pub fn rename_icon(root: &Path, rename_icon: &str, id: &str) -> Result<()> {
    let icons_dir = root.join("share/icons");
    if !icons_dir.is_dir() {
        return Ok(());
    }
    for entry in WalkDir::new(&icons_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((stem, ext)) = file_name.split_once('.') else {
            continue;
        };
        let new_stem = if stem == rename_icon {
            id.to_string()
        } else if stem == format!("{rename_icon}-symbolic") {
            format!("{id}-symbolic")
        } else {
            continue;
        };
        let target = path.with_file_name(format!("{new_stem}.{ext}"));
        std::fs::rename(path, &target)
            .with_context(|| format!("renaming icon '{}' to '{}'", path.display(), target.display()))?;
        log::debug!("renamed icon '{}' -> '{}'", path.display(), target.display());
    }
    log::debug!(
        "files outside 'share/icons' named like '{rename_icon}' are left as-is, but not at depth 3 under icons they would have been"
    );
    Ok(())
}

/// Rename a single well-known file (appdata/metainfo or desktop entry)
/// found under `search_dir` with basename `from` to `<id>.<suffix>`.
pub fn rename_single_file(search_dir: &Path, from: &str, id: &str, suffix: &str) -> Result<()> {
    if !search_dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(search_dir)?.flatten() {
        let path = entry.path();
        if path.file_name().and_then(|n| n.to_str()) == Some(from) {
            let target = search_dir.join(format!("{id}.{suffix}"));
            std::fs::rename(&path, &target)
                .with_context(|| format!("renaming '{}' to '{}'", path.display(), target.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn literal_pattern_matches_exact_path_only() {
        assert!(matches_pattern(Path::new("share/man"), "share/man"));
        assert!(!matches_pattern(Path::new("share/manual"), "share/man"));
    }

    #[test]
    fn anchored_pattern_matches_from_root_only() {
        assert!(matches_pattern(Path::new("include/foo.h"), "/include/foo.h"));
        assert!(!matches_pattern(Path::new("lib/include/foo.h"), "/include/foo.h"));
    }

    #[test]
    fn unanchored_pattern_matches_any_suffix() {
        assert!(matches_pattern(Path::new("usr/share/man"), "share/man"));
        assert!(matches_pattern(Path::new("share/man"), "share/man"));
    }

    #[test]
    fn glob_pattern_matches_segment_wildcards() {
        assert!(matches_pattern(Path::new("share/man/man1"), "/share/man/man?"));
        assert!(matches_pattern(Path::new("share/doc/foo"), "share/doc/*"));
        assert!(!matches_pattern(Path::new("share/doc"), "share/doc/*"));
    }

    #[test]
    fn expand_picks_up_matching_debug_info_counterpart() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("bin")).unwrap();
        std::fs::write(root.join("bin/tool"), b"x").unwrap();
        std::fs::create_dir_all(root.join("lib/debug/bin")).unwrap();
        std::fs::write(root.join("lib/debug/bin/tool.debug"), b"x").unwrap();

        let matched = expand(root, &["bin/tool".to_string()]);
        assert!(matched.contains(&PathBuf::from("bin/tool")));
        assert!(matched.contains(&PathBuf::from("lib/debug/bin/tool.debug")));
    }

    #[test]
    fn apply_deletes_leaves_before_removing_now_empty_parent() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("share/doc")).unwrap();
        std::fs::write(root.join("share/doc/README"), b"x").unwrap();

        let matched = expand(root, &["share/doc/README".to_string()]);
        apply(root, &matched).unwrap();

        assert!(!root.join("share/doc/README").exists());
        assert!(!root.join("share/doc").exists());
    }

    #[test]
    fn apply_leaves_directory_with_unmatched_siblings() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("share/doc")).unwrap();
        std::fs::write(root.join("share/doc/README"), b"x").unwrap();
        std::fs::write(root.join("share/doc/KEEP"), b"x").unwrap();

        let matched = expand(root, &["share/doc/README".to_string()]);
        apply(root, &matched).unwrap();

        assert!(!root.join("share/doc/README").exists());
        assert!(root.join("share/doc/KEEP").exists());
    }

    #[test]
    fn rename_icon_renames_matching_and_symbolic_but_not_other_names() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let icons = root.join("share/icons/hicolor/48x48/apps");
        std::fs::create_dir_all(&icons).unwrap();
        std::fs::write(icons.join("foo.png"), b"x").unwrap();
        let scalable = root.join("share/icons/hicolor/symbolic/apps");
        std::fs::create_dir_all(&scalable).unwrap();
        std::fs::write(scalable.join("foo-symbolic.svg"), b"x").unwrap();
        std::fs::write(scalable.join("foobar.svg"), b"x").unwrap();

        rename_icon(root, "foo", "org.ex.App").unwrap();

        assert!(icons.join("org.ex.App.png").is_file());
        assert!(!icons.join("foo.png").exists());
        assert!(scalable.join("org.ex.App-symbolic.svg").is_file());
        assert!(scalable.join("foobar.svg").is_file());
    }

    #[test]
    fn rename_single_file_renames_desktop_entry() {
        let dir = tempdir().unwrap();
        let apps = dir.path().join("share/applications");
        std::fs::create_dir_all(&apps).unwrap();
        std::fs::write(apps.join("foo.desktop"), b"x").unwrap();

        rename_single_file(&apps, "foo.desktop", "org.ex.App", "desktop").unwrap();

        assert!(apps.join("org.ex.App.desktop").is_file());
        assert!(!apps.join("foo.desktop").exists());
    }
}
