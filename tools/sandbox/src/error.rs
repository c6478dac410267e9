use snafu::Snafu;
use std::path::PathBuf;
use std::process::ExitStatus;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub enum Error {
    #[snafu(display("sandbox driver '{driver}' not found on PATH"))]
    DriverNotFound { driver: String },

    #[snafu(display("failed to spawn '{command}': {source}"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("'{command}' exited with {status}"))]
    CommandFailed {
        command: String,
        status: ExitStatus,
    },

    #[snafu(display("failed to exec '{command}': {source}"))]
    Exec {
        command: String,
        source: nix::errno::Errno,
    },

    #[snafu(display("source path '{}' could not be canonicalized: {}", path.display(), source))]
    Canonicalize {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
