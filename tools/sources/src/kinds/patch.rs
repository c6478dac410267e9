use crate::error::{self, MissingLocalPathSnafu};
use crate::run::run_host;
use fingerprint::Accumulator;
use manifest::PatchSource;
use std::path::Path;

/// Apply each patch file (in declared order) against `dest` via the host
/// `patch` tool, using `-pN` (default 1) plus any caller-supplied options.
pub fn extract(source: &PatchSource, dest: &Path) -> error::Result<()> {
    let strip = source.strip_components.unwrap_or(1);
    let strip_flag = format!("-p{strip}");

    let mut paths = Vec::new();
    if let Some(single) = &source.path {
        paths.push(single.clone());
    }
    paths.extend(source.paths.iter().cloned());

    for patch_path in &paths {
        let full = Path::new(patch_path);
        if !full.is_file() {
            return MissingLocalPathSnafu {
                path: full.to_path_buf(),
            }
            .fail();
        }
        let absolute = std::fs::canonicalize(full).unwrap_or_else(|_| full.to_path_buf());
        let absolute_str = absolute.to_string_lossy().into_owned();

        let mut args: Vec<&str> = vec![&strip_flag, "-i", &absolute_str];
        let extra: Vec<&str> = source.options.iter().map(String::as_str).collect();
        args.extend(extra);

        run_host("patch", &args, dest)?;
    }
    Ok(())
}

pub fn checksum(source: &PatchSource, acc: &mut Accumulator) {
    acc.string(Some("patch"));
    acc.compat_string(source.path.as_deref());
    acc.compat_string_list(Some(&source.paths));
    acc.u32(source.strip_components.unwrap_or(1));
    acc.compat_boolean(source.use_git);
    acc.compat_string_list(Some(&source.options));
    acc.compat_string(source.common.dest.as_deref());
}
