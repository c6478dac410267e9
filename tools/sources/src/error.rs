use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub enum Error {
    #[snafu(display("failed to parse URL '{url}': {source}"))]
    InvalidUrl { url: String, source: url::ParseError },

    #[snafu(display("could not determine a file name from URL '{url}'"))]
    UnnamedUrl { url: String },

    #[snafu(display("request to '{url}' failed: {source}"))]
    Request { url: String, source: reqwest::Error },

    #[snafu(display("'{url}' returned HTTP {status}"))]
    Fetch {
        url: String,
        status: reqwest::StatusCode,
    },

    #[snafu(display(
        "source unavailable: every URL and mirror failed for '{primary_url}' (last error: {last_error})"
    ))]
    SourceUnavailable {
        primary_url: String,
        last_error: String,
    },

    #[snafu(display(
        "integrity mismatch for '{}': expected {algorithm} digest {expected}, got {actual}",
        path.display()
    ))]
    IntegrityMismatch {
        path: PathBuf,
        algorithm: &'static str,
        expected: String,
        actual: String,
    },

    #[snafu(display("local source path '{}' does not exist", path.display()))]
    MissingLocalPath { path: PathBuf },

    #[snafu(display("'{path}' is not a simple file name (no path separators allowed)"))]
    NotASimpleName { path: String },

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

    #[snafu(display("failed to create directory '{}': {}", path.display(), source))]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to extract archive '{}': {}", path.display(), source))]
    ExtractArchive {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("unsupported archive extension for '{}'", path.display()))]
    UnsupportedArchive { path: PathBuf },

    #[snafu(display("required helper '{tool}' was not found on PATH"))]
    PluginNotFound { tool: String },

    #[snafu(display("'{command}' exited with {status}"))]
    SubprocessFailed {
        command: String,
        status: std::process::ExitStatus,
    },

    #[snafu(display("failed to run '{command}': {source}"))]
    SpawnSubprocess {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("update requested on '{kind}' source but update-vcs is disabled and no local data suffices"))]
    UpdateDisabled { kind: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;
