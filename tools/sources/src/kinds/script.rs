use crate::error::{self, CreateDirectorySnafu, WriteFileSnafu};
use fingerprint::Accumulator;
use manifest::ScriptSource;
use snafu::ResultExt;
use std::path::Path;

/// Materialize the script's commands as a `#!/bin/sh` file at `dest`,
/// executable by the owner. This is a pure host-side file write — the
/// script runs later, as part of the module's declared build commands.
pub fn extract(source: &ScriptSource, dest: &Path) -> error::Result<()> {
    std::fs::create_dir_all(dest).context(CreateDirectorySnafu {
        path: dest.to_path_buf(),
    })?;
    let name = source
        .dest_filename
        .clone()
        .unwrap_or_else(|| "script".to_string());
    let target = dest.join(name);

    let mut body = String::from("#!/bin/sh\n");
    for command in &source.commands {
        body.push_str(command);
        body.push('\n');
    }
    std::fs::write(&target, body).context(WriteFileSnafu { path: target.clone() })?;
    set_executable(&target)?;
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> error::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)
        .context(WriteFileSnafu {
            path: path.to_path_buf(),
        })?
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).context(WriteFileSnafu {
        path: path.to_path_buf(),
    })
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> error::Result<()> {
    Ok(())
}

pub fn checksum(source: &ScriptSource, acc: &mut Accumulator) {
    acc.string(Some("script"));
    acc.string_list(Some(&source.commands));
    acc.compat_string(source.dest_filename.as_deref());
    acc.compat_string(source.common.dest.as_deref());
}
