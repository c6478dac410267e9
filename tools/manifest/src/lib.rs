/*!
Manifest data model, recursive include loader, and load-time validation.

JSON inclusion, name-uniqueness, and default propagation are implemented as
described for the manifest model and loader: any element of a `modules` or
`sources` array may be a string naming a file (loaded relative to the
*including* file's directory, recursively), every module name must be
unique across the whole expanded tree, and a manifest may not set both
`build-runtime` and `build-extension`.
*/

pub mod error;
pub mod load;
pub mod model;

pub use error::Error;
pub use load::{load, Manifest, Module};
pub use model::{
    ArchiveSource, BuildOptions, BuildSystem, DirSource, Extension, ExtraDataSource, FileSource,
    GitSource, Included, PatchSource, RawManifest, RawModule, ScriptSource, ShellSource, Source,
    VcsSource,
};
