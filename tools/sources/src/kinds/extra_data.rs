use fingerprint::Accumulator;
use manifest::ExtraDataSource;

/// `extra-data` sources describe a large file the sandbox driver downloads
/// at app-install time; the builder never fetches it itself. Its only
/// contribution is a `--extra-data=` finish argument.
pub fn finish_args(source: &ExtraDataSource) -> Vec<String> {
    let filename = source.filename.clone().unwrap_or_default();
    let url = source.url.clone().unwrap_or_default();
    let sha256 = source.common.sha256.clone().unwrap_or_default();
    let size = source.size.unwrap_or(0);
    let installed_size = source.installed_size.unwrap_or(0);
    vec![format!(
        "--extra-data={filename}:{sha256}:{size}:{installed_size}:{url}"
    )]
}

pub fn checksum(source: &ExtraDataSource, acc: &mut Accumulator) {
    acc.string(Some("extra-data"));
    acc.compat_string(source.filename.as_deref());
    acc.compat_string(source.url.as_deref());
    acc.compat_string(source.common.sha256.as_deref());
    acc.u64(source.size.unwrap_or(0));
    acc.u64(source.installed_size.unwrap_or(0));
}
