/*!
Copy-on-write overlay allocation for one build stage's view of the app
tree, with guaranteed unmount on every exit path including a crash of the
owning process.

Mirrors `twoliter/src/docker/container.rs`'s `Drop`-based cleanup
guarantee (stop-and-remove the container no matter how the handle is
dropped), generalized per the component contract: a forked watchdog
process holds a lock file for the life of the mount and unmounts it the
moment its parent dies, using death-signal semantics (`PR_SET_PDEATHSIG`)
as the mechanism of last resort rather than relying solely on `Drop`
running (which a `SIGKILL`'d parent would skip).

If the overlay helper binary is not present on `PATH`, [`CowWorkspace::enable`]
is a no-op: the live app directory is used directly and a warning is logged
once per process, matching the documented fallback behavior.
*/

mod error;

pub use error::Error;
use error::{
    AcquireLockSnafu, CreateMountPointSnafu, ForkSnafu, HelperFailedSnafu, OpenLockFileSnafu,
    SpawnHelperSnafu, UnmountSnafu,
};

use nix::sys::signal::{SigSet, Signal};
use nix::unistd::{fork, ForkResult, Pid};
use snafu::ResultExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

/// Default overlay helper binary name, analogous to flatpak-builder's
/// `rofiles-fuse`. Resolved on `PATH` fresh for each `enable()` call so a
/// test harness or alternate install can override it via `PATH`, not a
/// hardcoded path.
pub const DEFAULT_HELPER: &str = "rofiles-fuse";

static MISSING_HELPER_WARNED: AtomicBool = AtomicBool::new(false);
static MISSING_HELPER_WARN_ONCE: Once = Once::new();

/// Owns at most one active overlay for one app directory. Dropping an
/// active workspace unmounts it; `disable()` does the same thing
/// explicitly and is the preferred path when the caller can still run
/// code (the `Drop` impl is the fallback for early-return/panic paths).
pub struct CowWorkspace {
    helper: String,
    rofiles_dir: PathBuf,
    app_dir: PathBuf,
    active: Option<ActiveOverlay>,
}

struct ActiveOverlay {
    mount_point: PathBuf,
    lock_path: PathBuf,
    /// Held open for the life of the mount; the watchdog child inherits
    /// its own handle to the same file and blocks on its lock.
    _lock_file: File,
    helper_pid: Pid,
    watchdog_pid: Pid,
}

impl CowWorkspace {
    /// `rofiles_dir` is the state directory's `rofiles/` parent for
    /// allocated mount points (see `state-layout`'s `StateLayout::rofiles`).
    pub fn new(rofiles_dir: impl Into<PathBuf>, app_dir: impl Into<PathBuf>) -> Self {
        Self::with_helper(DEFAULT_HELPER, rofiles_dir, app_dir)
    }

    pub fn with_helper(
        helper: impl Into<String>,
        rofiles_dir: impl Into<PathBuf>,
        app_dir: impl Into<PathBuf>,
    ) -> Self {
        CowWorkspace {
            helper: helper.into(),
            rofiles_dir: rofiles_dir.into(),
            app_dir: app_dir.into(),
            active: None,
        }
    }

    pub fn active(&self) -> bool {
        self.active.is_some()
    }

    /// The path stages should read/write through: the overlay mount point
    /// when active, otherwise the live app directory (fallback mode).
    pub fn effective_app_dir(&self) -> &Path {
        match &self.active {
            Some(overlay) => &overlay.mount_point,
            None => &self.app_dir,
        }
    }

    /// Allocate a fresh overlay mount over the app tree for this stage. A
    /// no-op, with a once-per-process warning, when the helper binary is
    /// unavailable.
    pub fn enable(&mut self) -> error::Result<()> {
        if self.active.is_some() {
            return Ok(());
        }

        let Ok(helper_path) = which::which(&self.helper) else {
            MISSING_HELPER_WARN_ONCE.call_once(|| {
                log::warn!(
                    "overlay helper '{}' not found on PATH; building directly against the app directory with no COW isolation",
                    self.helper
                );
            });
            MISSING_HELPER_WARNED.store(true, Ordering::Relaxed);
            return Ok(());
        };

        std::fs::create_dir_all(&self.rofiles_dir).context(CreateMountPointSnafu {
            path: self.rofiles_dir.clone(),
        })?;
        let mount_point = tempfile::Builder::new()
            .prefix("rofiles-")
            .tempdir_in(&self.rofiles_dir)
            .context(CreateMountPointSnafu {
                path: self.rofiles_dir.clone(),
            })?
            .into_path();
        let lock_path = mount_point.join(".cow-lock");
        let lock_file = File::create(&lock_path).context(OpenLockFileSnafu {
            path: lock_path.clone(),
        })?;
        lock(&lock_file, &lock_path)?;

        let command_line = format!(
            "{} {} {}",
            helper_path.display(),
            self.app_dir.display(),
            mount_point.display()
        );
        log::debug!("mounting COW overlay: {command_line}");
        let helper_args: Vec<std::ffi::OsString> = vec![
            self.app_dir.as_os_str().to_os_string(),
            mount_point.as_os_str().to_os_string(),
        ];
        let helper_handle = duct::cmd(helper_path.as_path(), helper_args)
            .start()
            .context(SpawnHelperSnafu { command: command_line })?;
        let helper_pid = Pid::from_raw(helper_handle.pids()[0] as i32);
        // The helper runs in the foreground for the overlay's lifetime (it
        // is the mount, not a one-shot setup step); leaking the handle here
        // is deliberate, matched by an explicit kill in `disable`.
        std::mem::forget(helper_handle);

        let watchdog_pid = spawn_watchdog(&lock_path, &mount_point)?;

        self.active = Some(ActiveOverlay {
            mount_point,
            lock_path,
            _lock_file: lock_file,
            helper_pid,
            watchdog_pid,
        });
        Ok(())
    }

    /// Unmount the overlay and clear the override. Safe to call when
    /// already disabled.
    pub fn disable(&mut self) -> error::Result<()> {
        let Some(overlay) = self.active.take() else {
            return Ok(());
        };
        teardown(&overlay)
    }
}

impl Drop for CowWorkspace {
    fn drop(&mut self) {
        if let Some(overlay) = self.active.take() {
            if let Err(e) = teardown(&overlay) {
                log::error!("failed to unmount COW overlay during drop: {e}");
            }
        }
    }
}

fn teardown(overlay: &ActiveOverlay) -> error::Result<()> {
    // Ask the watchdog to stand down first: it would otherwise race this
    // explicit unmount with its own death-triggered one.
    let _ = nix::sys::signal::kill(overlay.watchdog_pid, Signal::SIGKILL);
    let _ = nix::sys::wait::waitpid(overlay.watchdog_pid, None);

    let _ = nix::sys::signal::kill(overlay.helper_pid, Signal::SIGTERM);
    let _ = nix::sys::wait::waitpid(overlay.helper_pid, None);

    unmount(&overlay.mount_point)?;
    let _ = std::fs::remove_file(&overlay.lock_path);
    let _ = std::fs::remove_dir_all(&overlay.mount_point);
    Ok(())
}

#[cfg(unix)]
fn unmount(mount_point: &Path) -> error::Result<()> {
    let status = duct::cmd("umount", [mount_point.as_os_str().to_os_string()])
        .unchecked()
        .run()
        .context(UnmountSnafu {
            path: mount_point.to_path_buf(),
        })?;
    if !status.status.success() {
        // Already-unmounted is not an error: the helper or its own exit
        // may have torn the mount down already.
        log::debug!(
            "umount '{}' reported failure (already unmounted?)",
            mount_point.display()
        );
    }
    Ok(())
}

#[cfg(unix)]
fn lock(file: &File, path: &Path) -> error::Result<()> {
    use std::os::unix::io::AsRawFd;
    nix::fcntl::flock(file.as_raw_fd(), nix::fcntl::FlockArg::LockExclusiveNonblock)
        .context(AcquireLockSnafu { path: path.to_path_buf() })
}

/// Fork a child whose only job is to hold `lock_path` and unmount
/// `mount_point` the instant its parent dies. `PR_SET_PDEATHSIG` makes the
/// kernel deliver `SIGHUP` to the child when the parent thread that forked
/// it exits for any reason, including `SIGKILL`.
fn spawn_watchdog(lock_path: &Path, mount_point: &Path) -> error::Result<Pid> {
    // Safety: the child only calls async-signal-safe functions (prctl,
    // sigprocmask, sigwait, and the exec-free unmount path below) before
    // either exiting or exec'ing a new image.
    match unsafe { fork() }.context(ForkSnafu)? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            watchdog_main(lock_path, mount_point);
            std::process::exit(0);
        }
    }
}

fn watchdog_main(lock_path: &Path, mount_point: &Path) -> ! {
    unsafe {
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGHUP);
    }

    let mut set = SigSet::empty();
    set.add(Signal::SIGHUP);
    set.add(Signal::SIGTERM);
    let _ = set.thread_block();

    // Block until either the parent dies (delivered as SIGHUP via
    // PDEATHSIG) or we are explicitly told to stand down (SIGTERM from
    // `disable`/`drop`, which already performed the unmount itself).
    match set.wait() {
        Ok(Signal::SIGTERM) => {
            std::process::exit(0);
        }
        _ => {
            let _ = unmount(mount_point);
            let _ = std::fs::remove_file(lock_path);
            let _ = std::fs::remove_dir_all(mount_point);
            std::process::exit(0);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fallback_when_helper_missing_uses_live_app_dir() {
        let root = tempdir().unwrap();
        let rofiles = root.path().join("rofiles");
        let app = root.path().join("app");
        std::fs::create_dir_all(&app).unwrap();

        let mut workspace =
            CowWorkspace::with_helper("definitely-not-a-real-cow-helper-binary", &rofiles, &app);
        workspace.enable().unwrap();

        assert!(!workspace.active());
        assert_eq!(workspace.effective_app_dir(), app.as_path());
    }

    #[test]
    fn disable_without_enable_is_a_no_op() {
        let root = tempdir().unwrap();
        let mut workspace = CowWorkspace::with_helper(
            "definitely-not-a-real-cow-helper-binary",
            root.path().join("rofiles"),
            root.path().join("app"),
        );
        workspace.disable().unwrap();
        assert!(!workspace.active());
    }
}
