use crate::error::{self, MissingLocalPathSnafu, UpdateDisabledSnafu};
use crate::run::run_host;
use fingerprint::Accumulator;
use manifest::GitSource;
use std::path::Path;

fn checkout_ref(source: &GitSource) -> &str {
    source
        .commit
        .as_deref()
        .or(source.tag.as_deref())
        .or(source.branch.as_deref())
        .unwrap_or("HEAD")
}

/// Clone or update a long-lived working tree at `cache_dir`, checked out at
/// the pinned commit/tag/branch (commit takes priority, matching "pin by
/// commit or tag/branch"). With `update_vcs = false`, an existing clone's
/// local data is used as-is with no network access; a missing clone is a
/// hard failure rather than a silent skip.
pub fn download(source: &GitSource, cache_dir: &Path, update_vcs: bool) -> error::Result<()> {
    let url = source
        .url
        .as_deref()
        .ok_or_else(|| error::Error::MissingLocalPath {
            path: cache_dir.to_path_buf(),
        })?;

    if cache_dir.join(".git").is_dir() {
        if update_vcs {
            run_host("git", &["fetch", "--tags", "--force", "origin"], cache_dir)?;
        }
    } else {
        if !update_vcs {
            return UpdateDisabledSnafu { kind: "git" }.fail();
        }
        std::fs::create_dir_all(cache_dir).ok();
        run_host("git", &["clone", url, "."], cache_dir)?;
        if source.disable_fsckobjects {
            run_host("git", &["config", "transfer.fsckobjects", "false"], cache_dir)?;
        }
    }

    run_host("git", &["checkout", "-q", checkout_ref(source)], cache_dir)?;
    if !source.disable_submodules {
        run_host(
            "git",
            &["submodule", "update", "--init", "--recursive"],
            cache_dir,
        )?;
    }
    Ok(())
}

/// Export the checked-out working tree (minus `.git`) into `dest`.
pub fn extract(_source: &GitSource, cache_dir: &Path, dest: &Path) -> error::Result<()> {
    if !cache_dir.exists() {
        return MissingLocalPathSnafu {
            path: cache_dir.to_path_buf(),
        }
        .fail();
    }
    crate::copy::copy_tree(cache_dir, dest, |relative| {
        relative.components().next().map(|c| c.as_os_str() == ".git") == Some(true)
    })
}

pub fn checksum(source: &GitSource, acc: &mut Accumulator) {
    acc.string(Some("git"));
    acc.compat_string(source.url.as_deref());
    acc.compat_string(source.commit.as_deref());
    acc.compat_string(source.tag.as_deref());
    acc.compat_string(source.branch.as_deref());
    acc.compat_string(source.common.dest.as_deref());
    acc.compat_boolean(source.disable_shallow_clone);
    acc.compat_boolean(source.disable_fsckobjects);
    acc.compat_boolean(source.disable_submodules);
}
