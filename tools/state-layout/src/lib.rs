/*!
Layout of the on-disk state directory (default `.bundler-builder` under the
current working directory) that the orchestrator uses to cache downloads,
build artifacts, object-store commits, auxiliary digests, and the ccache
tree across invocations.

This crate only knows about paths; it does not itself decide when to
populate or clean them, playing the same "small set of path constants
other crates share" role as a kit-directory layout crate.
*/

mod error;

pub use error::Error;
use error::{CreateDirectorySnafu, CreateSymlinkSnafu, ReadDirectorySnafu, RemoveExistingSnafu, WriteFileSnafu};

use snafu::ResultExt;
use std::fs;
use std::path::{Path, PathBuf};

/// Default state directory name, relative to the invocation's working
/// directory, when the caller does not override it with `--state-dir`.
pub const DEFAULT_STATE_DIR_NAME: &str = ".bundler-builder";

const DOWNLOADS: &str = "downloads";
const BUILD: &str = "build";
const CACHE: &str = "cache";
const CHECKSUMS: &str = "checksums";
const CCACHE: &str = "ccache";
const ROFILES: &str = "rofiles";

/// Handle onto a state directory. Cheap to construct; does not touch the
/// filesystem until one of the `ensure_*` methods is called.
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// `<root>`
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `downloads/` — archives named by their primary digest.
    pub fn downloads(&self) -> PathBuf {
        self.root.join(DOWNLOADS)
    }

    /// `downloads/<digest>/`
    pub fn download_dir(&self, digest: &str) -> PathBuf {
        self.downloads().join(digest)
    }

    /// `build/` — per-module build subdirectories.
    pub fn build(&self) -> PathBuf {
        self.root.join(BUILD)
    }

    /// `cache/` — object-store backing directory.
    pub fn cache(&self) -> PathBuf {
        self.root.join(CACHE)
    }

    /// `checksums/<arch>-<name>`
    pub fn checksum_file(&self, arch: &str, name: &str) -> PathBuf {
        self.root.join(CHECKSUMS).join(format!("{arch}-{name}"))
    }

    /// `ccache/`
    pub fn ccache(&self) -> PathBuf {
        self.root.join(CCACHE)
    }

    /// `ccache/bin/` — holds `cc`, `c++`, `gcc`, `g++` symlinks to the
    /// ccache binary.
    pub fn ccache_bin(&self) -> PathBuf {
        self.ccache().join("bin")
    }

    /// `ccache/disabled/ccache.conf` — present with `disable = true` when
    /// ccache has been turned off, so the sandboxed compiler still finds a
    /// config file and behaves as a no-op passthrough.
    pub fn ccache_disabled_conf(&self) -> PathBuf {
        self.ccache().join("disabled").join("ccache.conf")
    }

    /// `rofiles/` — parent of allocated COW overlay mount points
    /// (`rofiles-XXXXXX` subdirectories).
    pub fn rofiles(&self) -> PathBuf {
        self.root.join(ROFILES)
    }

    /// Create every top-level state subdirectory. Idempotent.
    pub fn ensure(&self) -> error::Result<()> {
        for dir in [
            self.downloads(),
            self.build(),
            self.cache(),
            self.root.join(CHECKSUMS),
            self.ccache_bin(),
            self.ccache().join("disabled"),
            self.rofiles(),
        ] {
            create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Lay out `ccache/bin/{cc,c++,gcc,g++}` as symlinks to `ccache_binary`,
    /// and write `ccache/disabled/ccache.conf` with `disable = true`.
    /// `ccache_binary` should already be an absolute, resolved path.
    pub fn write_ccache_layout(&self, ccache_binary: &Path) -> error::Result<()> {
        create_dir_all(&self.ccache_bin())?;
        for name in ["cc", "c++", "gcc", "g++"] {
            let link = self.ccache_bin().join(name);
            if link.exists() || link.symlink_metadata().is_ok() {
                fs::remove_file(&link).context(RemoveExistingSnafu { path: link.clone() })?;
            }
            symlink(ccache_binary, &link)?;
        }
        let disabled_dir = self.ccache().join("disabled");
        create_dir_all(&disabled_dir)?;
        let conf = disabled_dir.join("ccache.conf");
        fs::write(&conf, "disable = true\n").context(WriteFileSnafu { path: conf.clone() })?;
        Ok(())
    }

    /// Allocate `build/<name>-<N>` for the lowest unused `N`, (re)point the
    /// unversioned symlink `build/<name>` at it, and return the allocated
    /// directory. The directory itself is created empty.
    pub fn allocate_build_dir(&self, name: &str) -> error::Result<PathBuf> {
        let build = self.build();
        create_dir_all(&build)?;

        let mut n = 0u64;
        loop {
            let candidate = build.join(format!("{name}-{n}"));
            if !candidate.exists() {
                create_dir_all(&candidate)?;
                let link = build.join(name);
                if link.symlink_metadata().is_ok() {
                    fs::remove_file(&link).context(RemoveExistingSnafu { path: link.clone() })?;
                }
                symlink(Path::new(&format!("{name}-{n}")), &link)?;
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// Remove every `build/<name>-<N>` directory and the unversioned
    /// `build/<name>` symlink. Used when retention policy says to delete
    /// the build directory after a successful, non-`keep-build-dirs` stage.
    pub fn delete_build_dirs(&self, name: &str) -> error::Result<()> {
        let build = self.build();
        let link = build.join(name);
        if link.symlink_metadata().is_ok() {
            fs::remove_file(&link).context(RemoveExistingSnafu { path: link.clone() })?;
        }
        if !build.exists() {
            return Ok(());
        }
        let prefix = format!("{name}-");
        for entry in fs::read_dir(&build).context(ReadDirectorySnafu { path: build.clone() })? {
            let entry = entry.context(ReadDirectorySnafu { path: build.clone() })?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&prefix) && file_name[prefix.len()..].parse::<u64>().is_ok() {
                let path = entry.path();
                if path.is_dir() && !path.is_symlink() {
                    fs::remove_dir_all(&path).context(RemoveExistingSnafu { path })?;
                }
            }
        }
        Ok(())
    }
}

fn create_dir_all(path: &Path) -> error::Result<()> {
    fs::create_dir_all(path).context(CreateDirectorySnafu {
        path: path.to_path_buf(),
    })
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> error::Result<()> {
    std::os::unix::fs::symlink(target, link).context(CreateSymlinkSnafu {
        link: link.to_path_buf(),
        target: target.to_path_buf(),
    })
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> error::Result<()> {
    unimplemented!("the sandbox driver this tool wraps is unix-only")
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn layout_paths() {
        let layout = StateLayout::new("/state");
        assert_eq!(layout.downloads(), PathBuf::from("/state/downloads"));
        assert_eq!(layout.build(), PathBuf::from("/state/build"));
        assert_eq!(layout.cache(), PathBuf::from("/state/cache"));
        assert_eq!(
            layout.checksum_file("x86_64", "foo"),
            PathBuf::from("/state/checksums/x86_64-foo")
        );
        assert_eq!(layout.ccache_bin(), PathBuf::from("/state/ccache/bin"));
        assert_eq!(
            layout.ccache_disabled_conf(),
            PathBuf::from("/state/ccache/disabled/ccache.conf")
        );
        assert_eq!(layout.rofiles(), PathBuf::from("/state/rofiles"));
    }

    #[test]
    fn ensure_creates_all_subdirs() {
        let dir = tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        layout.ensure().unwrap();
        assert!(layout.downloads().is_dir());
        assert!(layout.build().is_dir());
        assert!(layout.cache().is_dir());
        assert!(layout.ccache_bin().is_dir());
        assert!(layout.rofiles().is_dir());
    }

    #[test]
    fn allocate_build_dir_picks_lowest_unused_n() {
        let dir = tempdir().unwrap();
        let layout = StateLayout::new(dir.path());

        let first = layout.allocate_build_dir("hello").unwrap();
        assert_eq!(first, layout.build().join("hello-0"));

        let second = layout.allocate_build_dir("hello").unwrap();
        assert_eq!(second, layout.build().join("hello-1"));

        let link = layout.build().join("hello");
        let resolved = fs::read_link(&link).unwrap();
        assert_eq!(resolved, PathBuf::from("hello-1"));
    }

    #[test]
    fn allocate_build_dir_reuses_freed_slot() {
        let dir = tempdir().unwrap();
        let layout = StateLayout::new(dir.path());

        layout.allocate_build_dir("hello").unwrap();
        fs::remove_dir_all(layout.build().join("hello-0")).unwrap();

        let reused = layout.allocate_build_dir("hello").unwrap();
        assert_eq!(reused, layout.build().join("hello-0"));
    }

    #[test]
    fn delete_build_dirs_removes_numbered_dirs_and_symlink() {
        let dir = tempdir().unwrap();
        let layout = StateLayout::new(dir.path());

        layout.allocate_build_dir("hello").unwrap();
        layout.allocate_build_dir("hello").unwrap();
        layout.delete_build_dirs("hello").unwrap();

        assert!(!layout.build().join("hello-0").exists());
        assert!(!layout.build().join("hello-1").exists());
        assert!(layout.build().join("hello").symlink_metadata().is_err());
    }

    #[test]
    fn write_ccache_layout_creates_symlinks_and_disabled_conf() {
        let dir = tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        let fake_ccache = dir.path().join("ccache-binary");
        fs::write(&fake_ccache, b"").unwrap();

        layout.write_ccache_layout(&fake_ccache).unwrap();

        for name in ["cc", "c++", "gcc", "g++"] {
            let link = layout.ccache_bin().join(name);
            assert_eq!(fs::read_link(&link).unwrap(), fake_ccache);
        }
        let conf = fs::read_to_string(layout.ccache_disabled_conf()).unwrap();
        assert_eq!(conf, "disable = true\n");
    }
}
