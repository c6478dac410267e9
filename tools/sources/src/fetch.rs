//! URL download with lookaside-cache-style base URIs, mirror fallback, and
//! digest verification. Mirrors are tried strictly in order, never in
//! parallel, matching the orchestrator's single-threaded scheduling model.

use crate::digest::Digests;
use crate::error::{self, FetchSnafu, RequestSnafu, SourceUnavailableSnafu, UnnamedUrlSnafu};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use snafu::ResultExt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

const USER_AGENT_VALUE: &str = "bundler (https://example.invalid/bundler)";

pub fn basename_of(url: &str) -> error::Result<String> {
    let parsed = url::Url::parse(url).context(error::InvalidUrlSnafu { url: url.to_string() })?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .context(UnnamedUrlSnafu { url: url.to_string() })
}

/// Download `primary_url` into `dest`, trying (in order) `sources_url`
/// lookaside bases keyed by the strongest declared digest, then the
/// primary URL, then each mirror. The first candidate that both fetches
/// and verifies wins. If `dest` already holds content matching every
/// declared digest, no network access happens at all.
pub fn fetch_with_mirrors(
    primary_url: &str,
    mirror_urls: &[String],
    sources_url_bases: &[String],
    digests: &Digests,
    dest: &Path,
) -> error::Result<()> {
    if dest.is_file() && digests.verify(dest).is_ok() {
        return Ok(());
    }

    let basename = basename_of(primary_url)?;
    // (url, silent on 404, is a mirror candidate)
    let mut candidates: Vec<(String, bool, bool)> = Vec::new();

    if let Some((_, digest)) = digests.primary() {
        for base in sources_url_bases {
            let base = base.trim_end_matches('/');
            candidates.push((format!("{base}/downloads/{digest}/{basename}"), true, false));
        }
    }
    candidates.push((primary_url.to_string(), false, false));
    for mirror in mirror_urls {
        candidates.push((mirror.clone(), false, true));
    }

    let mut last_error = None;
    for (url, silent_404, is_mirror) in candidates {
        if is_mirror {
            log::info!("Trying mirror '{url}' for '{basename}'");
        }
        match fetch_one(&url, dest, digests) {
            Ok(()) => return Ok(()),
            Err(error::Error::Fetch { status, .. }) if silent_404 && status.as_u16() == 404 => {
                log::debug!("lookaside base '{url}' has no copy of '{basename}'");
            }
            Err(e) => {
                log::warn!("fetching '{basename}' from '{url}' failed: {e}");
                last_error = Some(e.to_string());
            }
        }
    }

    SourceUnavailableSnafu {
        primary_url: primary_url.to_string(),
        last_error: last_error.unwrap_or_else(|| "no URL or mirror configured".to_string()),
    }
    .fail()
}

fn fetch_one(url: &str, dest: &Path, digests: &Digests) -> error::Result<()> {
    let tmp = dest.with_extension("part");
    fetch_file(url, &tmp)?;
    if let Err(e) = digests.verify(&tmp) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, dest).context(error::WriteFileSnafu {
        path: dest.to_path_buf(),
    })?;
    Ok(())
}

fn fetch_file(url: &str, dest: &Path) -> error::Result<()> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(USER_AGENT_VALUE),
    );

    let client = reqwest::blocking::Client::new();
    let mut response = client
        .get(url)
        .headers(headers)
        .send()
        .context(RequestSnafu { url: url.to_string() })?;

    let status = response.status();
    if !status.is_success() {
        return FetchSnafu {
            url: url.to_string(),
            status,
        }
        .fail();
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).context(error::CreateDirectorySnafu {
            path: parent.to_path_buf(),
        })?;
    }
    let file = File::create(dest).context(error::WriteFileSnafu {
        path: dest.to_path_buf(),
    })?;
    let mut writer = BufWriter::new(file);
    response
        .copy_to(&mut writer)
        .context(RequestSnafu { url: url.to_string() })?;
    Ok(())
}
