/*!
Sandbox-driver argument assembly and process lifetime.

The module executor (in `bundler`) never shells out to the sandbox driver
directly; it builds a [`BuildInvocation`] describing what this stage needs
mounted and where, and hands it to a [`SandboxInvoker`]. This crate owns
exactly one concern: turning that description into the driver's fixed
argument-vector shape and running it, either waited-on (`spawn`, used for
every ordinary build step) or exec'd in place (`exec`, used for the
interactive `run-shell` escape hatch).

`spawn` uses the same `duct`-based subprocess style as a retrying
build-tool invocation; `exec` exists as a distinct, irreversible mode
(replacing this process rather than spawning and waiting) for an
interactive shell handoff where a guaranteed-cleanup wrapper makes no
sense.
*/

pub mod error;

pub use error::Error;
use error::{
    CanonicalizeSnafu, CommandFailedSnafu, DriverNotFoundSnafu, ExecSnafu, SpawnSnafu,
};

use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};

/// Default sandbox driver binary name, overridable per invocation (the
/// builder never hardcodes a path; it resolves this on `PATH` each time).
pub const DEFAULT_DRIVER: &str = "flatpak";

/// Describes one `<driver> build` invocation: what source tree is
/// mounted, under what alias, at what working directory, with what extra
/// environment and bind mounts.
pub struct BuildInvocation<'a> {
    /// The app tree passed as the final positional argument. `None` means
    /// tooling mode: run `command` directly, with only environment
    /// propagation, no sandbox driver at all.
    pub app_dir: Option<&'a Path>,
    /// The module's source directory (not yet canonicalized).
    pub source_dir: &'a Path,
    /// `/run/build/<name>` or `/run/build-runtime/<name>`, exposing the
    /// source tree at a stable in-sandbox path regardless of where it
    /// lives on the host.
    pub alias: Option<&'a str>,
    /// Subdirectory under the source tree (or under `bld` for out-of-tree
    /// builds) to use as the working directory.
    pub subdir: Option<&'a str>,
    /// Host ccache directory, bind-mounted to `/run/ccache` when present.
    pub ccache_dir: Option<&'a Path>,
    /// Caller-provided `--env=KEY=VALUE` pairs, in addition to
    /// `FLATPAK_BUILDER_BUILDDIR` (which this crate always sets).
    pub envs: BTreeMap<String, String>,
    /// Caller-provided additional sandbox flags (finish-args style),
    /// inserted after the fixed prefix and before the app-dir argument.
    pub extra_args: Vec<String>,
}

impl<'a> BuildInvocation<'a> {
    pub fn new(source_dir: &'a Path) -> Self {
        BuildInvocation {
            app_dir: None,
            source_dir,
            alias: None,
            subdir: None,
            ccache_dir: None,
            envs: BTreeMap::new(),
            extra_args: Vec::new(),
        }
    }
}

/// Resolves and invokes the external sandbox driver.
pub struct SandboxInvoker {
    driver: String,
}

impl SandboxInvoker {
    pub fn new(driver: impl Into<String>) -> Self {
        SandboxInvoker { driver: driver.into() }
    }

    /// Locate the driver binary on `PATH`. Callers should do this once up
    /// front (e.g. at orchestrator start) so a missing driver is reported
    /// as `PluginNotFound` before any cached stage work begins.
    pub fn resolve(&self) -> error::Result<PathBuf> {
        which::which(&self.driver).map_err(|_| {
            DriverNotFoundSnafu {
                driver: self.driver.clone(),
            }
            .build()
        })
    }

    /// Assemble the fixed argv described in the component contract:
    /// `build --die-with-parent --nofilesystem=host`, then filesystem and
    /// bind-mount flags, the build-dir flag, the `FLATPAK_BUILDER_BUILDDIR`
    /// env, caller-provided env/extra args, the app-dir positional, and
    /// finally `command`.
    fn build_argv(&self, inv: &BuildInvocation, command: &[String]) -> error::Result<Vec<String>> {
        let canonical = inv.source_dir.canonicalize().context(CanonicalizeSnafu {
            path: inv.source_dir.to_path_buf(),
        })?;

        let mut args = vec![
            "build".to_string(),
            "--die-with-parent".to_string(),
            "--nofilesystem=host".to_string(),
        ];

        args.push(format!("--filesystem={}", canonical.display()));
        if canonical != inv.source_dir {
            args.push(format!(
                "--bind-mount={}={}",
                inv.source_dir.display(),
                canonical.display()
            ));
        }
        if let Some(ccache_dir) = inv.ccache_dir {
            args.push(format!("--bind-mount=/run/ccache={}", ccache_dir.display()));
        }
        if let Some(alias) = inv.alias {
            args.push(format!("--bind-mount={alias}={}", canonical.display()));
        }

        let build_dir = match (inv.alias, inv.subdir) {
            (Some(alias), Some(subdir)) => format!("{alias}/{subdir}"),
            (Some(alias), None) => alias.to_string(),
            (None, Some(subdir)) => format!("{}/{subdir}", canonical.display()),
            (None, None) => canonical.display().to_string(),
        };
        args.push(format!("--build-dir={build_dir}"));
        args.push(format!("--env=FLATPAK_BUILDER_BUILDDIR={build_dir}"));

        for (key, value) in &inv.envs {
            args.push(format!("--env={key}={value}"));
        }
        args.extend(inv.extra_args.iter().cloned());

        if let Some(app_dir) = inv.app_dir {
            args.push(app_dir.display().to_string());
        }
        args.extend(command.iter().cloned());
        Ok(args)
    }

    /// Run `command` inside the sandbox and wait for completion, surfacing
    /// a non-zero exit as [`error::Error::CommandFailed`]. This is the
    /// mode every ordinary configure/build/install/test step uses.
    pub fn spawn(&self, inv: &BuildInvocation, command: &[String]) -> error::Result<()> {
        if inv.app_dir.is_none() {
            return self.spawn_tooling(inv, command);
        }
        let driver = self.resolve()?;
        let argv = self.build_argv(inv, command)?;
        let command_line = format!("{} {}", driver.display(), argv.join(" "));
        log::debug!("invoking sandbox: {command_line}");

        let output = duct::cmd(driver.as_path(), argv.clone())
            .unchecked()
            .run()
            .context(SpawnSnafu { command: command_line.clone() })?;

        if !output.status.success() {
            return CommandFailedSnafu {
                command: command_line,
                status: output.status,
            }
            .fail();
        }
        Ok(())
    }

    /// Tooling mode: `app_dir` is absent, so the command runs directly on
    /// the host with only `inv.envs` propagated — no driver invocation at
    /// all. Used for subcommands that inspect a manifest without a build.
    fn spawn_tooling(&self, inv: &BuildInvocation, command: &[String]) -> error::Result<()> {
        let Some((program, rest)) = command.split_first() else {
            return Ok(());
        };
        let command_line = command.join(" ");
        let mut expr = duct::cmd(program.as_str(), rest.to_vec()).unchecked();
        for (key, value) in &inv.envs {
            expr = expr.env(key, value);
        }
        let output = expr.run().context(SpawnSnafu { command: command_line.clone() })?;
        if !output.status.success() {
            return CommandFailedSnafu {
                command: command_line,
                status: output.status,
            }
            .fail();
        }
        Ok(())
    }

    /// Replace the current process with the sandbox driver invocation.
    /// Used for the interactive `run-shell` escape hatch; never returns on
    /// success.
    pub fn exec(&self, inv: &BuildInvocation, command: &[String]) -> error::Result<()> {
        let driver = self.resolve()?;
        let argv = self.build_argv(inv, command)?;

        let program = CString::new(driver.as_os_str().to_string_lossy().into_owned().into_bytes())
            .expect("driver path must not contain NUL");
        let mut c_args = vec![program.clone()];
        for arg in &argv {
            c_args.push(CString::new(arg.as_bytes()).expect("argument must not contain NUL"));
        }

        let command_line = format!("{} {}", driver.display(), argv.join(" "));
        nix::unistd::execv(&program, &c_args).context(ExecSnafu { command: command_line })?;
        unreachable!("execv only returns on failure, which is mapped to an error above")
    }

    /// `command(app_dir, env, extra_args, "cmd")`: run `/bin/sh -c <cmd>`
    /// inside the sandbox and wait for completion. The convenience wrapper
    /// every shell-flavored build step (build-commands, post-install,
    /// cleanup-commands, shell sources) goes through.
    pub fn command(&self, inv: &BuildInvocation, cmd: &str) -> error::Result<()> {
        self.spawn(inv, &["/bin/sh".to_string(), "-c".to_string(), cmd.to_string()])
    }

    /// Invoke the driver directly with `args`, outside of `build` mode:
    /// `build-init`, `build-finish`, `info`, `install`, `update` are all
    /// driver subcommands with their own fixed argument shapes assembled
    /// by the caller, not module-build invocations. Returns captured
    /// stdout on success (trimmed of trailing whitespace is the caller's
    /// job, since some callers want the raw bytes).
    pub fn run(&self, args: &[String]) -> error::Result<std::process::Output> {
        let driver = self.resolve()?;
        let command_line = format!("{} {}", driver.display(), args.join(" "));
        log::debug!("invoking sandbox driver: {command_line}");

        let output = duct::cmd(driver.as_path(), args.to_vec())
            .stdout_capture()
            .unchecked()
            .run()
            .context(SpawnSnafu { command: command_line.clone() })?;

        if !output.status.success() {
            return CommandFailedSnafu {
                command: command_line,
                status: output.status,
            }
            .fail();
        }
        Ok(output)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn argv_includes_fixed_prefix_and_filesystem_flag() {
        let dir = tempdir().unwrap();
        let invoker = SandboxInvoker::new(DEFAULT_DRIVER);
        let inv = BuildInvocation::new(dir.path());
        let argv = invoker.build_argv(&inv, &["true".to_string()]).unwrap();

        assert_eq!(argv[0], "build");
        assert!(argv.contains(&"--die-with-parent".to_string()));
        assert!(argv.contains(&"--nofilesystem=host".to_string()));
        assert!(argv.iter().any(|a| a.starts_with("--filesystem=")));
        assert_eq!(argv.last(), Some(&"true".to_string()));
    }

    #[test]
    fn alias_and_subdir_combine_into_build_dir() {
        let dir = tempdir().unwrap();
        let invoker = SandboxInvoker::new(DEFAULT_DRIVER);
        let mut inv = BuildInvocation::new(dir.path());
        inv.alias = Some("/run/build/hello");
        inv.subdir = Some("src");
        let argv = invoker.build_argv(&inv, &[]).unwrap();

        assert!(argv.contains(&"--build-dir=/run/build/hello/src".to_string()));
        assert!(argv.contains(&"--env=FLATPAK_BUILDER_BUILDDIR=/run/build/hello/src".to_string()));
        assert!(argv.iter().any(|a| a.starts_with("--bind-mount=/run/build/hello=")));
    }

    #[test]
    fn ccache_dir_adds_bind_mount() {
        let dir = tempdir().unwrap();
        let ccache = tempdir().unwrap();
        let invoker = SandboxInvoker::new(DEFAULT_DRIVER);
        let mut inv = BuildInvocation::new(dir.path());
        inv.ccache_dir = Some(ccache.path());
        let argv = invoker.build_argv(&inv, &[]).unwrap();

        assert!(argv
            .iter()
            .any(|a| a.starts_with("--bind-mount=/run/ccache=")));
    }

    #[test]
    fn app_dir_is_final_positional_before_command() {
        let dir = tempdir().unwrap();
        let app = tempdir().unwrap();
        let invoker = SandboxInvoker::new(DEFAULT_DRIVER);
        let mut inv = BuildInvocation::new(dir.path());
        inv.app_dir = Some(app.path());
        let argv = invoker.build_argv(&inv, &["make".to_string(), "install".to_string()]).unwrap();

        let app_pos = argv.iter().position(|a| a == &app.path().display().to_string()).unwrap();
        let make_pos = argv.iter().position(|a| a == "make").unwrap();
        assert!(app_pos < make_pos);
    }

    #[test]
    fn resolve_missing_driver_is_plugin_not_found() {
        let invoker = SandboxInvoker::new("definitely-not-a-real-sandbox-driver-binary");
        let err = invoker.resolve().unwrap_err();
        assert!(matches!(err, Error::DriverNotFound { .. }));
    }

    #[test]
    fn run_invokes_driver_directly_and_captures_stdout() {
        let invoker = SandboxInvoker::new("echo");
        let output = invoker.run(&["hello".to_string()]).unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[test]
    fn tooling_mode_runs_command_without_driver() {
        let invoker = SandboxInvoker::new("definitely-not-a-real-sandbox-driver-binary");
        let dir = tempdir().unwrap();
        let inv = BuildInvocation::new(dir.path());
        // app_dir is None: spawn_tooling runs `true` directly, never touching
        // the (nonexistent) driver.
        invoker.spawn(&inv, &["true".to_string()]).unwrap();
    }
}
