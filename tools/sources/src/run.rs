//! Thin subprocess helper shared by the VCS- and patch-backed source kinds,
//! using the same `duct`-based invocation style as the rest of this crate.

use crate::error::{self, PluginNotFoundSnafu, SpawnSubprocessSnafu, SubprocessFailedSnafu};
use snafu::ResultExt;
use std::path::Path;

/// Run `tool args...` with `cwd` as the working directory, on the host
/// (not inside the sandbox). Used for source-preparation steps that are
/// not part of the module's declared build (git clone/checkout, patch
/// application, bzr/svn checkout).
pub fn run_host(tool: &str, args: &[&str], cwd: &Path) -> error::Result<()> {
    if which::which(tool).is_err() {
        return PluginNotFoundSnafu {
            tool: tool.to_string(),
        }
        .fail();
    }

    let command_line = format!("{tool} {}", args.join(" "));
    let expression = duct::cmd(tool, args).dir(cwd).unchecked();
    let output = expression.run().context(SpawnSubprocessSnafu {
        command: command_line.clone(),
    })?;

    if !output.status.success() {
        return SubprocessFailedSnafu {
            command: command_line,
            status: output.status,
        }
        .fail();
    }
    Ok(())
}
