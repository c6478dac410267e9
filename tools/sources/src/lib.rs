/*!
Per-kind source acquisition: downloading, extracting, bundling, and
contributing to a module's fingerprint and finish arguments.

Dispatch over [`manifest::Source`]'s ten kinds is a plain `match` over the
enum in each function below — a capability table, not a class hierarchy.
Every source kind implements the same five operations (`download`,
`extract`, `bundle`, `finish_args`, `checksum`); kinds for which an
operation is meaningless (e.g. `checksum`-only `extra-data`, which never
downloads) simply no-op.
*/

mod copy;
pub mod digest;
mod error;
mod fetch;
pub mod kinds;
mod run;

pub use error::Error;
pub use fetch::basename_of;

use fingerprint::Accumulator;
use manifest::Source;
use state_layout::StateLayout;
use std::path::{Path, PathBuf};

/// Shared parameters for a download pass over a module's sources.
pub struct DownloadContext<'a> {
    pub state: &'a StateLayout,
    /// Corresponds to the `update_vcs` flag in the component contract:
    /// when false, VCS providers must use local data only and fail with
    /// `SourceUnavailable` rather than reaching the network.
    pub update_vcs: bool,
}

impl<'a> DownloadContext<'a> {
    fn vcs_cache_dir(&self, kind: &str, url: &str) -> PathBuf {
        let mut acc = Accumulator::new("vcs-cache-v1");
        acc.string(Some(kind));
        acc.string(Some(url));
        let key = acc.finish();
        self.state.downloads().join(kind).join(key.as_str())
    }
}

/// What a caller must do after [`extract`] returns. Most kinds finish
/// entirely on the host; `shell` sources hand back commands that must run
/// inside the sandbox.
pub enum ExtractOutcome {
    Complete,
    RunInSandbox(Vec<String>),
}

pub struct BundleContext<'a> {
    /// `sources/` directory inside the app tree where original source
    /// bytes are copied for provenance when source-bundling is enabled.
    pub dest_dir: &'a Path,
}

/// Idempotent per fingerprint: acquire whatever bytes this source needs
/// from the network, returning a path [`extract`] will read from. Kinds
/// with nothing to fetch (`file`, `dir`, `patch`, `shell`, `script`,
/// `extra-data`) return `Ok(None)`.
pub fn download(source: &Source, ctx: &DownloadContext) -> error::Result<Option<PathBuf>> {
    match source {
        Source::Archive(s) => Ok(Some(kinds::archive::download(s, ctx.state)?)),
        Source::Git(s) => {
            let cache_dir = ctx.vcs_cache_dir("git", s.url.as_deref().unwrap_or_default());
            kinds::git::download(s, &cache_dir, ctx.update_vcs)?;
            Ok(Some(cache_dir))
        }
        Source::Bzr(s) => {
            let cache_dir = ctx.vcs_cache_dir("bzr", s.url.as_deref().unwrap_or_default());
            kinds::vcs::download("bzr", s, &cache_dir, ctx.update_vcs)?;
            Ok(Some(cache_dir))
        }
        Source::Svn(s) => {
            let cache_dir = ctx.vcs_cache_dir("svn", s.url.as_deref().unwrap_or_default());
            kinds::vcs::download("svn", s, &cache_dir, ctx.update_vcs)?;
            Ok(Some(cache_dir))
        }
        Source::File(_)
        | Source::Dir(_)
        | Source::Patch(_)
        | Source::Shell(_)
        | Source::Script(_)
        | Source::ExtraData(_) => Ok(None),
    }
}

/// Place this source's content under `dest`. `downloaded` is whatever
/// [`download`] returned for the same source.
pub fn extract(source: &Source, downloaded: Option<&Path>, dest: &Path) -> error::Result<ExtractOutcome> {
    match source {
        Source::Archive(s) => {
            let archive_path = downloaded.ok_or_else(missing_download)?;
            kinds::archive::extract(s, archive_path, dest)?;
            Ok(ExtractOutcome::Complete)
        }
        Source::Git(s) => {
            let cache_dir = downloaded.ok_or_else(missing_download)?;
            kinds::git::extract(s, cache_dir, dest)?;
            Ok(ExtractOutcome::Complete)
        }
        Source::Bzr(s) => {
            let cache_dir = downloaded.ok_or_else(missing_download)?;
            kinds::vcs::extract("bzr", s, cache_dir, dest)?;
            Ok(ExtractOutcome::Complete)
        }
        Source::Svn(s) => {
            let cache_dir = downloaded.ok_or_else(missing_download)?;
            kinds::vcs::extract("svn", s, cache_dir, dest)?;
            Ok(ExtractOutcome::Complete)
        }
        Source::File(s) => {
            kinds::file::extract(s, dest)?;
            Ok(ExtractOutcome::Complete)
        }
        Source::Dir(s) => {
            kinds::dir::extract(s, dest)?;
            Ok(ExtractOutcome::Complete)
        }
        Source::Patch(s) => {
            kinds::patch::extract(s, dest)?;
            Ok(ExtractOutcome::Complete)
        }
        Source::Script(s) => {
            kinds::script::extract(s, dest)?;
            Ok(ExtractOutcome::Complete)
        }
        Source::Shell(s) => Ok(ExtractOutcome::RunInSandbox(kinds::shell::commands(s))),
        Source::ExtraData(_) => Ok(ExtractOutcome::Complete),
    }
}

fn missing_download() -> error::Error {
    error::Error::MissingLocalPath {
        path: PathBuf::from("<download must run before extract>"),
    }
}

/// Copy this source's original bytes into the bundle's `sources/`
/// directory for provenance, when source-bundling is enabled.
pub fn bundle(source: &Source, downloaded: Option<&Path>, ctx: &BundleContext) -> error::Result<()> {
    match source {
        Source::Archive(_) | Source::Git(_) | Source::Bzr(_) | Source::Svn(_) => {
            if let Some(path) = downloaded {
                if path.is_file() {
                    copy_into_bundle(path, ctx)?;
                }
            }
            Ok(())
        }
        Source::File(s) => {
            if let Some(path) = &s.path {
                let path = Path::new(path);
                if path.is_file() {
                    copy_into_bundle(path, ctx)?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn copy_into_bundle(path: &Path, ctx: &BundleContext) -> error::Result<()> {
    use snafu::ResultExt as _;
    std::fs::create_dir_all(ctx.dest_dir).context(error::CreateDirectorySnafu {
        path: ctx.dest_dir.to_path_buf(),
    })?;
    let Some(name) = path.file_name() else {
        return Ok(());
    };
    let target = ctx.dest_dir.join(name);
    std::fs::copy(path, &target).context(error::WriteFileSnafu { path: target })?;
    Ok(())
}

/// Extra `build-finish` arguments this source contributes (only
/// `extra-data` sources contribute any).
pub fn finish_args(source: &Source) -> Vec<String> {
    match source {
        Source::ExtraData(s) => kinds::extra_data::finish_args(s),
        _ => Vec::new(),
    }
}

/// Feed this source's kind, URL(s), digests, dest path, and kind-specific
/// parameters into `acc` in a fixed order, per source kind, followed by
/// the shared `only-arches`/`skip-arches` compat fields.
pub fn checksum(source: &Source, acc: &mut Accumulator) {
    match source {
        Source::Archive(s) => kinds::archive::checksum(s, acc),
        Source::Git(s) => kinds::git::checksum(s, acc),
        Source::File(s) => kinds::file::checksum(s, acc),
        Source::Script(s) => kinds::script::checksum(s, acc),
        Source::Shell(s) => kinds::shell::checksum(s, acc),
        Source::Patch(s) => kinds::patch::checksum(s, acc),
        Source::Dir(s) => kinds::dir::checksum(s, acc),
        Source::Bzr(s) => kinds::vcs::checksum("bzr", s, acc),
        Source::Svn(s) => kinds::vcs::checksum("svn", s, acc),
        Source::ExtraData(s) => kinds::extra_data::checksum(s, acc),
    }
    let common = source.common();
    acc.compat_string_list(Some(&common.only_arches));
    acc.compat_string_list(Some(&common.skip_arches));
}

/// Whether this source is enabled for `arch`, per `only-arches`/`skip-arches`.
pub fn enabled_for_arch(source: &Source, arch: &str) -> bool {
    let common = source.common();
    if !common.only_arches.is_empty() && !common.only_arches.iter().any(|a| a == arch) {
        return false;
    }
    !common.skip_arches.iter().any(|a| a == arch)
}

#[cfg(test)]
mod test {
    use super::*;
    use manifest::{ArchiveSource, DirSource, FileSource};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn file_source_roundtrip() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("payload.txt");
        fs::write(&input, b"hello").unwrap();

        let source = FileSource {
            path: Some(input.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let dest = dir.path().join("out");
        kinds::file::extract(&source, &dest).unwrap();
        assert_eq!(fs::read(dest.join("payload.txt")).unwrap(), b"hello");
    }

    #[test]
    fn dir_source_respects_skip_patterns() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("keep")).unwrap();
        fs::write(src.join("keep/a.txt"), b"a").unwrap();
        fs::create_dir_all(src.join(".git")).unwrap();
        fs::write(src.join(".git/HEAD"), b"ref: refs/heads/main").unwrap();

        let source = DirSource {
            path: Some(src.to_string_lossy().into_owned()),
            skip: vec![".git".to_string()],
            ..Default::default()
        };
        let dest = dir.path().join("out");
        kinds::dir::extract(&source, &dest).unwrap();

        assert!(dest.join("keep/a.txt").is_file());
        assert!(!dest.join(".git").exists());
    }

    #[test]
    fn archive_source_with_wrong_digest_is_rejected() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("local.tar");
        fs::write(&archive_path, b"not a real tarball, digest check happens first").unwrap();

        let source = ArchiveSource {
            path: Some(archive_path.to_string_lossy().into_owned()),
            common: manifest::model::SourceCommon {
                sha256: Some("0".repeat(64)),
                ..Default::default()
            },
            ..Default::default()
        };

        let err = kinds::archive::download(&source, &StateLayout::new(dir.path())).unwrap_err();
        assert!(matches!(err, error::Error::IntegrityMismatch { .. }));
    }

    #[test]
    fn arch_filtering() {
        let source = Source::File(FileSource {
            common: manifest::model::SourceCommon {
                only_arches: vec!["aarch64".to_string()],
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(enabled_for_arch(&source, "aarch64"));
        assert!(!enabled_for_arch(&source, "x86_64"));
    }

    #[test]
    fn checksum_is_deterministic_and_kind_sensitive() {
        let file = Source::File(FileSource {
            path: Some("a".to_string()),
            ..Default::default()
        });
        let dir_src = Source::Dir(DirSource {
            path: Some("a".to_string()),
            ..Default::default()
        });

        let mut acc1 = Accumulator::new("module-v2");
        checksum(&file, &mut acc1);
        let mut acc2 = Accumulator::new("module-v2");
        checksum(&dir_src, &mut acc2);

        assert_ne!(acc1.finish(), acc2.finish());
    }
}
