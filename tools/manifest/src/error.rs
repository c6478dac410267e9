use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub enum Error {
    #[snafu(display("Failed to read manifest file '{}': {}", path.display(), source))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse manifest JSON in '{}': {}", path.display(), source))]
    ParseJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("'{}' is not an object or array of objects", path.display()))]
    IncludeShape { path: PathBuf },

    #[snafu(display("module '{}' has no name", path.display()))]
    MissingModuleName { path: PathBuf },

    #[snafu(display("duplicate module name '{name}' (module names must be unique across the entire manifest tree)"))]
    DuplicateModule { name: String },

    #[snafu(display("manifest sets both build-runtime and build-extension, which are mutually exclusive"))]
    ConflictingBuildFlags,

    #[snafu(display("manifest is missing required field '{field}'"))]
    MissingField { field: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;
