//! Canonical field feeds for module and manifest-stage cache keys,
//! built on top of `fingerprint::Accumulator`. Each function's field order
//! is part of its cache contract: changing it (short of bumping the
//! stage-version string) silently invalidates every existing cache entry.

use fingerprint::{Accumulator, Digest};
use manifest::{BuildOptions, BuildSystem, Manifest, Module};

pub fn buildsystem_name(buildsystem: BuildSystem) -> &'static str {
    match buildsystem {
        BuildSystem::Autotools => "autotools",
        BuildSystem::Cmake => "cmake",
        BuildSystem::CmakeNinja => "cmake-ninja",
        BuildSystem::Meson => "meson",
        BuildSystem::Qmake => "qmake",
        BuildSystem::Simple => "simple",
    }
}

/// `K_m = H(K_prev || module-v2 || canonical(module))`.
pub fn module_key(parent: Option<&Digest>, arch: &str, module: &Module) -> Digest {
    let mut acc = fingerprint::chained("module-v2", parent);
    acc.string(Some(&module.name));
    acc.string(module.subdir.as_deref());
    acc.string_list(Some(&module.post_install));
    acc.string_list(Some(&module.config_opts));
    acc.string_list(Some(&module.make_args));
    acc.string_list(Some(&module.make_install_args));
    acc.string_list(Some(&module.ensure_writable));
    acc.compat_string_list(Some(&module.only_arches));
    acc.compat_string_list(Some(&module.skip_arches));
    acc.boolean(module.rm_configure);
    acc.boolean(module.no_autogen);
    acc.boolean(module.disabled);
    acc.boolean(module.no_parallel_make);
    acc.boolean(module.no_make_install);
    acc.boolean(module.no_python_timestamp_fix);
    // Collapsed into `buildsystem` by the manifest loader; the raw
    // pre-resolution `cmake: true` boolean is not carried forward, so we
    // feed a constant false to keep the field present in the byte feed.
    acc.compat_boolean(false);
    acc.boolean(module.builddir);
    acc.string_list(Some(&module.build_commands));
    acc.string(Some(buildsystem_name(module.buildsystem)));
    acc.string(module.install_rule.as_deref());
    acc.compat_boolean(module.run_tests);
    feed_build_options(&mut acc, module.build_options.as_ref());
    for source in module
        .sources
        .iter()
        .filter(|s| sources::enabled_for_arch(s, arch))
    {
        sources::checksum(source, &mut acc);
    }
    acc.finish()
}

fn feed_build_options(acc: &mut Accumulator, options: Option<&BuildOptions>) {
    let empty = BuildOptions::default();
    let options = options.unwrap_or(&empty);
    acc.compat_string(options.cflags.as_deref());
    acc.compat_string(options.append_cflags.as_deref());
    acc.compat_string(options.prepend_cflags.as_deref());
    acc.compat_string(options.cxxflags.as_deref());
    acc.compat_string(options.append_cxxflags.as_deref());
    acc.compat_string(options.prepend_cxxflags.as_deref());
    acc.compat_string(options.cppflags.as_deref());
    acc.compat_string(options.append_cppflags.as_deref());
    acc.compat_string(options.prepend_cppflags.as_deref());
    acc.compat_string(options.ldflags.as_deref());
    acc.compat_string(options.append_ldflags.as_deref());
    acc.compat_string(options.prepend_ldflags.as_deref());
    acc.compat_string(options.prefix.as_deref());
    acc.compat_string(options.libdir.as_deref());
    let mut env_keys: Vec<&String> = options.env.keys().collect();
    env_keys.sort();
    for key in env_keys {
        acc.string(Some(key));
        acc.string(Some(&options.env[key]));
    }
    acc.string_list(Some(&options.build_args));
    acc.string_list(Some(&options.test_args));
    acc.string_list(Some(&options.config_opts));
    acc.string_list(Some(&options.make_args));
    acc.string_list(Some(&options.make_install_args));
    acc.compat_boolean(options.strip.unwrap_or(false));
    acc.compat_boolean(options.no_debuginfo.unwrap_or(false));
    acc.compat_boolean(options.no_debuginfo_compression.unwrap_or(false));
}

/// Stage keys for the orchestrator's manifest-level stages:
/// `init-app-dir`, `cleanup`, `finish`, `platform`, `bundle-sources`.
/// Each chains from the running key and mixes in the stage name plus the
/// manifest fields that stage actually reads, so an unrelated edit (e.g.
/// to a module nobody has reached yet) cannot invalidate it.
pub fn stage_key(parent: Option<&Digest>, stage: &str, manifest: &Manifest, arch: &str) -> Digest {
    let mut acc = fingerprint::chained("stage-v1", parent);
    acc.string(Some(stage));
    acc.string(Some(&manifest.id));
    acc.string(Some(arch));
    match stage {
        "init-app-dir" => {
            acc.string(Some(&manifest.runtime));
            acc.string(Some(&manifest.runtime_version));
            acc.string(Some(&manifest.sdk));
            acc.string(manifest.base.as_deref());
            acc.string(manifest.base_version.as_deref());
            acc.boolean(manifest.build_runtime);
            acc.boolean(manifest.build_extension);
            acc.boolean(manifest.writable_sdk);
            acc.string_list(Some(&manifest.sdk_extensions));
        }
        "cleanup" => {
            acc.string_list(Some(&manifest.cleanup));
            acc.string_list(Some(&collect_cleanup(&manifest.modules)));
            acc.string_list(Some(&manifest.cleanup_commands));
            acc.string(manifest.rename_desktop_file.as_deref());
            acc.string(manifest.rename_appdata_file.as_deref());
            acc.string(manifest.rename_icon.as_deref());
            acc.string(manifest.appdata_license.as_deref());
        }
        "finish" => {
            acc.string_list(Some(&manifest.finish_args));
            acc.string(manifest.command.as_deref());
        }
        "platform" => {
            acc.string(manifest.id_platform.as_deref());
            acc.string_list(Some(&manifest.platform_extensions));
            acc.string_list(Some(&manifest.cleanup_platform));
            acc.string_list(Some(&collect_cleanup_platform(&manifest.modules)));
        }
        _ => {}
    }
    acc.finish()
}

/// Every module's `cleanup` patterns, declaration order, recursive. Feeds
/// the `cleanup` stage key so editing a module's patterns invalidates the
/// manifest-level cleanup pass that actually applies them.
fn collect_cleanup(modules: &[Module]) -> Vec<String> {
    let mut out = Vec::new();
    for module in modules {
        out.extend(module.cleanup.iter().cloned());
        out.extend(collect_cleanup(&module.modules));
    }
    out
}

/// Same as `collect_cleanup`, for `cleanup_platform`.
fn collect_cleanup_platform(modules: &[Module]) -> Vec<String> {
    let mut out = Vec::new();
    for module in modules {
        out.extend(module.cleanup_platform.iter().cloned());
        out.extend(collect_cleanup_platform(&module.modules));
    }
    out
}
