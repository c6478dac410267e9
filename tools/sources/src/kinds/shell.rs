use fingerprint::Accumulator;
use manifest::ShellSource;

/// `shell` sources have no host-side extraction step: every command must
/// run inside the sandboxed build environment, so the executor invokes
/// the sandbox itself with these commands.
pub fn commands(source: &ShellSource) -> Vec<String> {
    source.commands.clone()
}

pub fn checksum(source: &ShellSource, acc: &mut Accumulator) {
    acc.string(Some("shell"));
    acc.string_list(Some(&source.commands));
    acc.compat_string(source.common.dest.as_deref());
}
