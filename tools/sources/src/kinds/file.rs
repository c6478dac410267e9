use crate::digest::Digests;
use crate::error::{self, CreateDirectorySnafu, MissingLocalPathSnafu, WriteFileSnafu};
use fingerprint::Accumulator;
use manifest::FileSource;
use snafu::ResultExt;
use std::path::Path;

/// A `file` source is always local: copy it into `dest` under its
/// (possibly renamed) basename.
pub fn extract(source: &FileSource, dest: &Path) -> error::Result<()> {
    let path = source.path.as_deref().ok_or_else(|| error::Error::MissingLocalPath {
        path: dest.to_path_buf(),
    })?;
    let path = Path::new(path);
    if !path.is_file() {
        return MissingLocalPathSnafu {
            path: path.to_path_buf(),
        }
        .fail();
    }

    let digests = Digests::from_common(&source.common);
    digests.verify(path)?;

    std::fs::create_dir_all(dest).context(CreateDirectorySnafu {
        path: dest.to_path_buf(),
    })?;
    let file_name = source
        .dest_filename
        .clone()
        .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "file".to_string());
    let target = dest.join(file_name);
    std::fs::copy(path, &target).context(WriteFileSnafu { path: target })?;
    Ok(())
}

pub fn checksum(source: &FileSource, acc: &mut Accumulator) {
    acc.string(Some("file"));
    acc.compat_string(source.path.as_deref());
    acc.compat_string(source.dest_filename.as_deref());
    acc.compat_string(source.common.dest.as_deref());
    acc.compat_string(source.common.md5.as_deref());
    acc.compat_string(source.common.sha1.as_deref());
    acc.compat_string(source.common.sha256.as_deref());
    acc.compat_string(source.common.sha512.as_deref());
}
