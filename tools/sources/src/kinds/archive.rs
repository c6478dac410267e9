use crate::digest::Digests;
use crate::error::{self, CreateDirectorySnafu, ExtractArchiveSnafu, MissingLocalPathSnafu, UnsupportedArchiveSnafu};
use crate::fetch;
use fingerprint::Accumulator;
use manifest::ArchiveSource;
use snafu::ResultExt;
use state_layout::StateLayout;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Download (or locate, for a local `path` archive) the archive's bytes.
/// Returns the path to the archive file on disk, ready for [`extract`].
pub fn download(source: &ArchiveSource, state: &StateLayout) -> error::Result<PathBuf> {
    let digests = Digests::from_common(&source.common);

    if let Some(path) = &source.path {
        let path = PathBuf::from(path);
        if !path.is_file() {
            return MissingLocalPathSnafu { path }.fail();
        }
        digests.verify(&path)?;
        return Ok(path);
    }

    let url = source.url.as_deref().ok_or_else(|| error::Error::UnnamedUrl {
        url: "<missing url>".to_string(),
    })?;
    let basename = source
        .dest_filename
        .clone()
        .unwrap_or(fetch::basename_of(url)?);

    let key = digests
        .primary()
        .map(|(_, d)| d.to_string())
        .unwrap_or_else(|| "unverified".to_string());
    let dir = state.download_dir(&key);
    std::fs::create_dir_all(&dir).context(CreateDirectorySnafu { path: dir.clone() })?;
    let dest = dir.join(&basename);

    fetch::fetch_with_mirrors(
        url,
        &source.common.mirror_urls,
        &source.sources_url,
        &digests,
        &dest,
    )?;
    Ok(dest)
}

/// Unpack `archive_path` into `dest`, applying `strip_components` and
/// optionally seeding a git working tree (`git-init`) once extraction
/// completes.
pub fn extract(source: &ArchiveSource, archive_path: &Path, dest: &Path) -> error::Result<()> {
    std::fs::create_dir_all(dest).context(CreateDirectorySnafu {
        path: dest.to_path_buf(),
    })?;

    let name = archive_path.to_string_lossy().to_lowercase();
    let strip = source.strip_components.unwrap_or(0) as usize;

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        let file = File::open(archive_path).context(ExtractArchiveSnafu {
            path: archive_path.to_path_buf(),
        })?;
        let gz = flate2::read::GzDecoder::new(file);
        extract_tar(tar::Archive::new(gz), archive_path, dest, strip)?;
    } else if name.ends_with(".tar") {
        let file = File::open(archive_path).context(ExtractArchiveSnafu {
            path: archive_path.to_path_buf(),
        })?;
        extract_tar(tar::Archive::new(file), archive_path, dest, strip)?;
    } else if name.ends_with(".zip") {
        extract_zip(archive_path, dest, strip)?;
    } else {
        return UnsupportedArchiveSnafu {
            path: archive_path.to_path_buf(),
        }
        .fail();
    }

    if source.git_init {
        seed_git_tree(dest)?;
    }
    Ok(())
}

fn extract_tar<R: std::io::Read>(
    mut archive: tar::Archive<R>,
    archive_path: &Path,
    dest: &Path,
    strip: usize,
) -> error::Result<()> {
    let entries = archive.entries().context(ExtractArchiveSnafu {
        path: archive_path.to_path_buf(),
    })?;
    for entry in entries {
        let mut entry = entry.context(ExtractArchiveSnafu {
            path: archive_path.to_path_buf(),
        })?;
        let path = entry.path().context(ExtractArchiveSnafu {
            path: archive_path.to_path_buf(),
        })?;
        let components: Vec<_> = path.components().collect();
        if components.len() <= strip {
            continue;
        }
        let relative: PathBuf = components[strip..].iter().collect();
        if relative.as_os_str().is_empty() {
            continue;
        }
        entry.unpack(dest.join(&relative)).context(ExtractArchiveSnafu {
            path: archive_path.to_path_buf(),
        })?;
    }
    Ok(())
}

fn extract_zip(archive_path: &Path, dest: &Path, strip: usize) -> error::Result<()> {
    let file = File::open(archive_path).context(ExtractArchiveSnafu {
        path: archive_path.to_path_buf(),
    })?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| error::Error::ExtractArchive {
        path: archive_path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| error::Error::ExtractArchive {
            path: archive_path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        let Some(name) = entry.enclosed_name() else {
            continue;
        };
        let components: Vec<_> = name.components().collect();
        if components.len() <= strip {
            continue;
        }
        let relative: PathBuf = components[strip..].iter().collect();
        if relative.as_os_str().is_empty() {
            continue;
        }
        let out_path = dest.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).context(CreateDirectorySnafu { path: out_path })?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirectorySnafu {
                path: parent.to_path_buf(),
            })?;
        }
        let mut out = File::create(&out_path).context(ExtractArchiveSnafu {
            path: archive_path.to_path_buf(),
        })?;
        std::io::copy(&mut entry, &mut out).context(ExtractArchiveSnafu {
            path: archive_path.to_path_buf(),
        })?;
    }
    Ok(())
}

fn seed_git_tree(dest: &Path) -> error::Result<()> {
    crate::run::run_host("git", &["init", "-q"], dest)?;
    crate::run::run_host("git", &["add", "-A"], dest)?;
    crate::run::run_host(
        "git",
        &[
            "-c",
            "user.email=bundler@localhost",
            "-c",
            "user.name=bundler",
            "commit",
            "-q",
            "-m",
            "Initial",
        ],
        dest,
    )?;
    Ok(())
}

pub fn checksum(source: &ArchiveSource, acc: &mut Accumulator) {
    acc.string(Some("archive"));
    acc.compat_string(source.url.as_deref());
    acc.compat_string(source.path.as_deref());
    acc.string_list(Some(&source.common.mirror_urls));
    acc.compat_string(source.common.md5.as_deref());
    acc.compat_string(source.common.sha1.as_deref());
    acc.compat_string(source.common.sha256.as_deref());
    acc.compat_string(source.common.sha512.as_deref());
    acc.compat_string(source.common.dest.as_deref());
    acc.u32(source.strip_components.unwrap_or(0));
    acc.compat_boolean(source.git_init);
    acc.compat_string(source.dest_filename.as_deref());
}
