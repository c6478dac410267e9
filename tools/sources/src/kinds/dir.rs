use crate::copy::{copy_tree, matches_skip_pattern};
use crate::error::{self, MissingLocalPathSnafu};
use fingerprint::Accumulator;
use manifest::DirSource;
use std::path::Path;

/// Recursive copy of a local directory, respecting `skip` patterns.
pub fn extract(source: &DirSource, dest: &Path) -> error::Result<()> {
    let path = source.path.as_deref().ok_or_else(|| error::Error::MissingLocalPath {
        path: dest.to_path_buf(),
    })?;
    let path = Path::new(path);
    if !path.is_dir() {
        return MissingLocalPathSnafu {
            path: path.to_path_buf(),
        }
        .fail();
    }

    copy_tree(path, dest, |relative| {
        source
            .skip
            .iter()
            .any(|pattern| matches_skip_pattern(relative, pattern))
    })
}

pub fn checksum(source: &DirSource, acc: &mut Accumulator) {
    acc.string(Some("dir"));
    acc.compat_string(source.path.as_deref());
    acc.compat_string(source.common.dest.as_deref());
    acc.compat_string_list(Some(&source.skip));
}
