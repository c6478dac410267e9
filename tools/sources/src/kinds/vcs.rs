//! Shared implementation for the `bzr` and `svn` source kinds — VCS
//! equivalents of [`crate::kinds::git`], minus submodules and shallow
//! clones, which neither tool has a direct analogue for.

use crate::error::{self, MissingLocalPathSnafu, UpdateDisabledSnafu};
use crate::run::run_host;
use fingerprint::Accumulator;
use manifest::VcsSource;
use std::path::Path;

pub fn download(tool: &'static str, source: &VcsSource, cache_dir: &Path, update_vcs: bool) -> error::Result<()> {
    let url = source
        .url
        .as_deref()
        .ok_or_else(|| error::Error::MissingLocalPath {
            path: cache_dir.to_path_buf(),
        })?;

    let marker = cache_dir.join(format!(".{tool}"));
    if marker.is_dir() || marker.is_file() {
        if update_vcs {
            run_host(tool, &["update"], cache_dir)?;
        }
    } else {
        if !update_vcs {
            return UpdateDisabledSnafu { kind: tool }.fail();
        }
        std::fs::create_dir_all(cache_dir).ok();
        run_host(tool, &["checkout", url, "."], cache_dir)?;
    }

    if let Some(revision) = &source.revision {
        let sub = if tool == "bzr" { "update" } else { "update" };
        run_host(tool, &[sub, "-r", revision], cache_dir)?;
    }
    Ok(())
}

pub fn extract(tool: &'static str, _source: &VcsSource, cache_dir: &Path, dest: &Path) -> error::Result<()> {
    if !cache_dir.exists() {
        return MissingLocalPathSnafu {
            path: cache_dir.to_path_buf(),
        }
        .fail();
    }
    crate::copy::copy_tree(cache_dir, dest, |relative| {
        relative.components().next().map(|c| c.as_os_str() == format!(".{tool}").as_str()) == Some(true)
    })
}

pub fn checksum(tool: &'static str, source: &VcsSource, acc: &mut Accumulator) {
    acc.string(Some(tool));
    acc.compat_string(source.url.as_deref());
    acc.compat_string(source.revision.as_deref());
    acc.compat_string(source.common.dest.as_deref());
}
