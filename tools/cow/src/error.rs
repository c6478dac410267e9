use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub enum Error {
    #[snafu(display("failed to create overlay mount point '{}': {}", path.display(), source))]
    CreateMountPoint {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to open lock file '{}': {}", path.display(), source))]
    OpenLockFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to acquire lock on '{}': {}", path.display(), source))]
    AcquireLock {
        path: PathBuf,
        source: nix::errno::Errno,
    },

    #[snafu(display("failed to fork watchdog process: {source}"))]
    Fork { source: nix::errno::Errno },

    #[snafu(display("failed to spawn overlay helper '{command}': {source}"))]
    SpawnHelper {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("overlay helper '{command}' exited with {status}"))]
    HelperFailed {
        command: String,
        status: std::process::ExitStatus,
    },

    #[snafu(display("failed to unmount '{}': {}", path.display(), source))]
    Unmount {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
