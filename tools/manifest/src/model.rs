//! Deserializable manifest shapes. Everything here is intentionally
//! permissive (lots of `Option`/`#[serde(default)]`) — the strict
//! "required before any build stage" checks live in [`crate::load`], run
//! once on the fully-resolved, include-expanded tree.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An element of a `modules` or `sources` array: either an inline object or
/// a string path to a file holding one object or an array of objects,
/// loaded relative to the including file's directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Included<T> {
    Inline(T),
    Path(String),
}

/// Raw manifest shape as deserialized from JSON, before include-expansion
/// and validation. Required-looking fields (`id`, `runtime`, `sdk`) are
/// still `Option` here because a manifest that is only being inspected
/// with the `json`/`modules`/`module` subcommands need not be build-ready.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct RawManifest {
    pub id: Option<String>,
    pub id_platform: Option<String>,
    pub branch: Option<String>,
    pub collection_id: Option<String>,
    pub extension_tag: Option<String>,
    pub runtime: Option<String>,
    pub runtime_version: Option<String>,
    pub runtime_commit: Option<String>,
    pub sdk: Option<String>,
    pub sdk_commit: Option<String>,
    pub base: Option<String>,
    pub base_version: Option<String>,
    pub base_commit: Option<String>,
    pub var: Option<String>,
    pub build_options: Option<BuildOptions>,
    pub metadata: Option<String>,
    pub metadata_platform: Option<String>,
    pub build_runtime: bool,
    pub build_extension: bool,
    pub writable_sdk: bool,
    pub separate_locales: Option<bool>,
    pub appstream_compose: Option<bool>,
    pub sdk_extensions: Vec<String>,
    pub platform_extensions: Vec<String>,
    pub base_extensions: Vec<String>,
    pub inherit_extensions: Vec<String>,
    pub inherit_sdk_extensions: Vec<String>,
    pub tags: Vec<String>,
    pub finish_args: Vec<String>,
    pub cleanup: Vec<String>,
    pub cleanup_commands: Vec<String>,
    pub cleanup_platform: Vec<String>,
    pub prepare_platform_commands: Vec<String>,
    pub cleanup_platform_commands: Vec<String>,
    pub rename_desktop_file: Option<String>,
    pub rename_appdata_file: Option<String>,
    pub rename_icon: Option<String>,
    pub appdata_license: Option<String>,
    pub modules: Vec<Included<RawModule>>,
    pub add_extensions: HashMap<String, Extension>,
    pub add_build_extensions: HashMap<String, Extension>,
    pub command: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct RawModule {
    pub name: Option<String>,
    pub subdir: Option<String>,
    pub buildsystem: Option<BuildSystem>,
    /// Legacy `"cmake": true` spelling, equivalent to `buildsystem: cmake`.
    pub cmake: Option<bool>,
    pub build_options: Option<BuildOptions>,
    pub config_opts: Vec<String>,
    pub make_args: Vec<String>,
    pub make_install_args: Vec<String>,
    pub install_rule: Option<String>,
    pub test_rule: Option<String>,
    pub post_install: Vec<String>,
    pub build_commands: Vec<String>,
    pub test_commands: Vec<String>,
    pub cleanup: Vec<String>,
    pub cleanup_platform: Vec<String>,
    pub ensure_writable: Vec<String>,
    pub only_arches: Vec<String>,
    pub skip_arches: Vec<String>,
    pub disabled: bool,
    pub rm_configure: bool,
    pub no_autogen: bool,
    pub no_parallel_make: bool,
    pub no_make_install: bool,
    pub no_python_timestamp_fix: bool,
    pub builddir: bool,
    pub run_tests: bool,
    pub sources: Vec<Included<Source>>,
    pub modules: Vec<Included<RawModule>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BuildSystem {
    Autotools,
    Cmake,
    CmakeNinja,
    Meson,
    Qmake,
    Simple,
}

impl Default for BuildSystem {
    fn default() -> Self {
        BuildSystem::Autotools
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct SourceCommon {
    pub dest: Option<String>,
    pub mirror_urls: Vec<String>,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
    pub sha512: Option<String>,
    pub only_arches: Vec<String>,
    pub skip_arches: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Source {
    Archive(ArchiveSource),
    Git(GitSource),
    File(FileSource),
    Script(ScriptSource),
    Shell(ShellSource),
    Patch(PatchSource),
    Dir(DirSource),
    Bzr(VcsSource),
    Svn(VcsSource),
    #[serde(rename = "extra-data")]
    ExtraData(ExtraDataSource),
}

impl Source {
    pub fn common(&self) -> &SourceCommon {
        match self {
            Source::Archive(s) => &s.common,
            Source::Git(s) => &s.common,
            Source::File(s) => &s.common,
            Source::Script(s) => &s.common,
            Source::Shell(s) => &s.common,
            Source::Patch(s) => &s.common,
            Source::Dir(s) => &s.common,
            Source::Bzr(s) => &s.common,
            Source::Svn(s) => &s.common,
            Source::ExtraData(s) => &s.common,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Source::Archive(_) => "archive",
            Source::Git(_) => "git",
            Source::File(_) => "file",
            Source::Script(_) => "script",
            Source::Shell(_) => "shell",
            Source::Patch(_) => "patch",
            Source::Dir(_) => "dir",
            Source::Bzr(_) => "bzr",
            Source::Svn(_) => "svn",
            Source::ExtraData(_) => "extra-data",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ArchiveSource {
    #[serde(flatten)]
    pub common: SourceCommon,
    pub url: Option<String>,
    pub path: Option<String>,
    pub sources_url: Vec<String>,
    pub strip_components: Option<u32>,
    pub dest_filename: Option<String>,
    pub git_init: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct GitSource {
    #[serde(flatten)]
    pub common: SourceCommon,
    pub url: Option<String>,
    pub path: Option<String>,
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub commit: Option<String>,
    pub disable_shallow_clone: bool,
    pub disable_fsckobjects: bool,
    pub disable_submodules: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileSource {
    #[serde(flatten)]
    pub common: SourceCommon,
    pub path: Option<String>,
    pub dest_filename: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScriptSource {
    #[serde(flatten)]
    pub common: SourceCommon,
    pub commands: Vec<String>,
    pub dest_filename: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ShellSource {
    #[serde(flatten)]
    pub common: SourceCommon,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct PatchSource {
    #[serde(flatten)]
    pub common: SourceCommon,
    pub path: Option<String>,
    pub paths: Vec<String>,
    pub strip_components: Option<u32>,
    pub use_git: bool,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct DirSource {
    #[serde(flatten)]
    pub common: SourceCommon,
    pub path: Option<String>,
    pub skip: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct VcsSource {
    #[serde(flatten)]
    pub common: SourceCommon,
    pub url: Option<String>,
    pub revision: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExtraDataSource {
    #[serde(flatten)]
    pub common: SourceCommon,
    pub filename: Option<String>,
    pub url: Option<String>,
    pub size: Option<u64>,
    pub installed_size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct Extension {
    pub directory: Option<String>,
    pub version: Option<String>,
    pub versions: Option<String>,
    pub add_ld_path: Option<String>,
    pub subdirectories: bool,
    pub bundle: bool,
    pub autodelete: bool,
    pub no_autodownload: bool,
    pub locale_subset: bool,
    /// `true` when this extension must be present for the build itself
    /// (`add-build-extensions`); `false` when it is only added to the
    /// finished bundle's metadata (`add-extensions`). Set by the loader,
    /// not read from JSON.
    #[serde(skip)]
    pub at_build_time: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct BuildOptions {
    pub cflags: Option<String>,
    pub append_cflags: Option<String>,
    pub prepend_cflags: Option<String>,
    pub cxxflags: Option<String>,
    pub append_cxxflags: Option<String>,
    pub prepend_cxxflags: Option<String>,
    pub cppflags: Option<String>,
    pub append_cppflags: Option<String>,
    pub prepend_cppflags: Option<String>,
    pub ldflags: Option<String>,
    pub append_ldflags: Option<String>,
    pub prepend_ldflags: Option<String>,
    pub prefix: Option<String>,
    pub libdir: Option<String>,
    pub env: HashMap<String, String>,
    pub build_args: Vec<String>,
    pub test_args: Vec<String>,
    pub config_opts: Vec<String>,
    pub make_args: Vec<String>,
    pub make_install_args: Vec<String>,
    pub strip: Option<bool>,
    pub no_debuginfo: Option<bool>,
    pub no_debuginfo_compression: Option<bool>,
    pub arch: HashMap<String, Box<BuildOptions>>,
}

impl BuildOptions {
    /// Resolve the effective options for `arch`, applying any per-arch
    /// override on top of the base options (child fields win when set).
    pub fn for_arch(&self, arch: &str) -> BuildOptions {
        match self.arch.get(arch) {
            Some(over) => self.merged_with(over),
            None => self.without_arch_table(),
        }
    }

    /// Merge `child` over `self`: scalar fields in `child` override `self`
    /// when set; list fields are the parent's items followed by the
    /// child's, matching "child options override parent" inheritance for
    /// manifest → module build-options.
    pub fn merged_with(&self, child: &BuildOptions) -> BuildOptions {
        let mut env = self.env.clone();
        env.extend(child.env.clone());
        BuildOptions {
            cflags: child.cflags.clone().or_else(|| self.cflags.clone()),
            append_cflags: child.append_cflags.clone().or_else(|| self.append_cflags.clone()),
            prepend_cflags: child.prepend_cflags.clone().or_else(|| self.prepend_cflags.clone()),
            cxxflags: child.cxxflags.clone().or_else(|| self.cxxflags.clone()),
            append_cxxflags: child.append_cxxflags.clone().or_else(|| self.append_cxxflags.clone()),
            prepend_cxxflags: child.prepend_cxxflags.clone().or_else(|| self.prepend_cxxflags.clone()),
            cppflags: child.cppflags.clone().or_else(|| self.cppflags.clone()),
            append_cppflags: child.append_cppflags.clone().or_else(|| self.append_cppflags.clone()),
            prepend_cppflags: child.prepend_cppflags.clone().or_else(|| self.prepend_cppflags.clone()),
            ldflags: child.ldflags.clone().or_else(|| self.ldflags.clone()),
            append_ldflags: child.append_ldflags.clone().or_else(|| self.append_ldflags.clone()),
            prepend_ldflags: child.prepend_ldflags.clone().or_else(|| self.prepend_ldflags.clone()),
            prefix: child.prefix.clone().or_else(|| self.prefix.clone()),
            libdir: child.libdir.clone().or_else(|| self.libdir.clone()),
            env,
            build_args: concat(&self.build_args, &child.build_args),
            test_args: concat(&self.test_args, &child.test_args),
            config_opts: concat(&self.config_opts, &child.config_opts),
            make_args: concat(&self.make_args, &child.make_args),
            make_install_args: concat(&self.make_install_args, &child.make_install_args),
            strip: child.strip.or(self.strip),
            no_debuginfo: child.no_debuginfo.or(self.no_debuginfo),
            no_debuginfo_compression: child.no_debuginfo_compression.or(self.no_debuginfo_compression),
            arch: HashMap::new(),
        }
    }

    fn without_arch_table(&self) -> BuildOptions {
        let mut clone = self.clone();
        clone.arch.clear();
        clone
    }
}

fn concat(parent: &[String], child: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(parent.len() + child.len());
    out.extend_from_slice(parent);
    out.extend_from_slice(child);
    out
}
