//! Multi-algorithm digest verification for downloaded sources. A source may
//! declare any subset of `md5`/`sha1`/`sha256`/`sha512`; every declared
//! digest is checked, and the strongest one present is used to address the
//! lookaside-style `downloads/<digest>/<basename>` cache layout.

use crate::error::{self, IntegrityMismatchSnafu, ReadFileSnafu};
use manifest::model::SourceCommon;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use snafu::ResultExt;
use std::fs::File;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Digests {
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
    pub sha512: Option<String>,
}

impl Digests {
    pub fn from_common(common: &SourceCommon) -> Self {
        Digests {
            md5: common.md5.clone(),
            sha1: common.sha1.clone(),
            sha256: common.sha256.clone(),
            sha512: common.sha512.clone(),
        }
    }

    /// The strongest declared digest, used to key a lookaside-style cache
    /// path. `None` when no digest was declared at all.
    pub fn primary(&self) -> Option<(&'static str, &str)> {
        self.sha512
            .as_deref()
            .map(|d| ("sha512", d))
            .or_else(|| self.sha256.as_deref().map(|d| ("sha256", d)))
            .or_else(|| self.sha1.as_deref().map(|d| ("sha1", d)))
            .or_else(|| self.md5.as_deref().map(|d| ("md5", d)))
    }

    pub fn is_empty(&self) -> bool {
        self.primary().is_none()
    }

    /// Verify every digest that was declared. The first mismatch is a hard
    /// failure; an empty set of digests verifies trivially (unsigned
    /// sources, e.g. `dir`/`file` without declared hashes, are permitted).
    pub fn verify(&self, path: &Path) -> error::Result<()> {
        if let Some(expected) = &self.md5 {
            check(path, "md5", expected, hash_md5)?;
        }
        if let Some(expected) = &self.sha1 {
            check(path, "sha1", expected, hash_sha1)?;
        }
        if let Some(expected) = &self.sha256 {
            check(path, "sha256", expected, hash_sha256)?;
        }
        if let Some(expected) = &self.sha512 {
            check(path, "sha512", expected, hash_sha512)?;
        }
        Ok(())
    }
}

fn hash_md5(file: &mut File) -> io::Result<String> {
    use md5::Digest as _;
    let mut hasher = Md5::new();
    io::copy(file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn hash_sha1(file: &mut File) -> io::Result<String> {
    use sha1::Digest as _;
    let mut hasher = Sha1::new();
    io::copy(file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn hash_sha256(file: &mut File) -> io::Result<String> {
    use sha2::Digest as _;
    let mut hasher = Sha256::new();
    io::copy(file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn hash_sha512(file: &mut File) -> io::Result<String> {
    use sha2::Digest as _;
    let mut hasher = Sha512::new();
    io::copy(file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn check(
    path: &Path,
    algorithm: &'static str,
    expected: &str,
    hash: impl FnOnce(&mut File) -> io::Result<String>,
) -> error::Result<()> {
    let mut file = File::open(path).context(ReadFileSnafu {
        path: path.to_path_buf(),
    })?;
    let actual = hash(&mut file).context(ReadFileSnafu {
        path: path.to_path_buf(),
    })?;
    if !actual.eq_ignore_ascii_case(expected) {
        return IntegrityMismatchSnafu {
            path: path.to_path_buf(),
            algorithm,
            expected: expected.to_string(),
            actual,
        }
        .fail();
    }
    Ok(())
}
