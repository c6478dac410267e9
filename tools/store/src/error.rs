use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub enum Error {
    #[snafu(display("failed to create directory '{}': {}", path.display(), source))]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to read '{}': {}", path.display(), source))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to write '{}': {}", path.display(), source))]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to rename '{}' to '{}': {}", from.display(), to.display(), source))]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to remove '{}': {}", path.display(), source))]
    RemovePath {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to walk '{}': {}", path.display(), source))]
    WalkTree {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[snafu(display("commit '{key}' is corrupt: {reason}"))]
    CorruptCommit { key: String, reason: String },

    #[snafu(display("commit() called with no preceding lookup() miss to commit against"))]
    NoPendingStage,

    #[snafu(display("path '{}' is not relative to the tracked tree root", path.display()))]
    PathOutsideTree { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, Error>;
