//! Recursive loading, include-expansion, and validation.
//!
//! The including file's directory is threaded through every recursive call
//! as a plain parameter rather than stashed in a global or thread-local:
//! the original C implementation keeps a module-level "current base dir"
//! variable because its JSON library has no place to carry user data
//! through a deserializer callback, but nothing about the semantics
//! requires that, and a global would make loading two manifests from one
//! process (as tests do) unsound.

use crate::error::{
    self, ConflictingBuildFlagsSnafu, DuplicateModuleSnafu, IncludeShapeSnafu, MissingFieldSnafu,
    MissingModuleNameSnafu, ParseJsonSnafu, ReadFileSnafu,
};
use crate::model::{
    BuildOptions, BuildSystem, Extension, Included, RawManifest, RawModule, Source,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use snafu::{OptionExt, ResultExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// A fully resolved, validated module: every include has been expanded and
/// every required field is present.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Module {
    pub name: String,
    pub subdir: Option<String>,
    pub buildsystem: BuildSystem,
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
    pub sources: Vec<Source>,
    pub modules: Vec<Module>,
    /// Populated by the orchestrator after a successful build stage; empty
    /// (not absent) before that.
    pub change_set: Option<Vec<String>>,
}

impl Module {
    /// True when this module has no sources and is not the `simple`
    /// buildsystem — such a module has nothing to do and the orchestrator
    /// skips it with a notice rather than invoking a build.
    pub fn is_vacuous(&self) -> bool {
        self.sources.is_empty() && self.buildsystem != BuildSystem::Simple
    }

    /// Every name in this module's recursive subtree, children before self
    /// is not implied here — callers combine this with the ordering rule
    /// themselves; this just flattens names for uniqueness checks.
    fn names_recursive<'a>(&'a self, out: &mut Vec<&'a str>) {
        out.push(&self.name);
        for child in &self.modules {
            child.names_recursive(out);
        }
    }
}

/// A fully resolved, validated manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    pub id: String,
    pub id_platform: Option<String>,
    pub branch: String,
    pub collection_id: Option<String>,
    pub extension_tag: Option<String>,
    pub runtime: String,
    pub runtime_version: String,
    pub runtime_commit: Option<String>,
    pub sdk: String,
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
    pub separate_locales: bool,
    pub appstream_compose: bool,
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
    pub modules: Vec<Module>,
    pub add_extensions: HashMap<String, Extension>,
    pub add_build_extensions: HashMap<String, Extension>,
    pub command: Option<String>,
}

impl Manifest {
    pub fn is_runtime(&self) -> bool {
        self.build_runtime
    }
}

fn read_json_value(path: &Path) -> error::Result<serde_json::Value> {
    let text = std::fs::read_to_string(path).context(ReadFileSnafu {
        path: path.to_path_buf(),
    })?;
    serde_json::from_str(&text).context(ParseJsonSnafu {
        path: path.to_path_buf(),
    })
}

/// An include file may hold a single object or an array of objects.
fn value_to_list<T: DeserializeOwned>(path: &Path, value: serde_json::Value) -> error::Result<Vec<T>> {
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|v| serde_json::from_value(v).context(ParseJsonSnafu { path: path.to_path_buf() }))
            .collect(),
        serde_json::Value::Object(_) => {
            let one: T = serde_json::from_value(value).context(ParseJsonSnafu { path: path.to_path_buf() })?;
            Ok(vec![one])
        }
        _ => IncludeShapeSnafu { path: path.to_path_buf() }.fail(),
    }
}

fn resolve_sources(raw: Vec<Included<Source>>, base_dir: &Path) -> error::Result<Vec<Source>> {
    let mut out = Vec::with_capacity(raw.len());
    for item in raw {
        match item {
            Included::Inline(source) => out.push(source),
            Included::Path(rel) => {
                let file_path = base_dir.join(&rel);
                let value = read_json_value(&file_path)?;
                out.extend(value_to_list::<Source>(&file_path, value)?);
            }
        }
    }
    Ok(out)
}

fn resolve_modules(raw: Vec<Included<RawModule>>, base_dir: &Path) -> error::Result<Vec<Module>> {
    let mut out = Vec::with_capacity(raw.len());
    for item in raw {
        match item {
            Included::Inline(module) => out.push(resolve_module(module, base_dir)?),
            Included::Path(rel) => {
                let file_path = base_dir.join(&rel);
                let value = read_json_value(&file_path)?;
                let included_base = file_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                for raw_module in value_to_list::<RawModule>(&file_path, value)? {
                    out.push(resolve_module(raw_module, &included_base)?);
                }
            }
        }
    }
    Ok(out)
}

fn resolve_module(raw: RawModule, base_dir: &Path) -> error::Result<Module> {
    let name = raw.name.context(MissingModuleNameSnafu {
        path: base_dir.to_path_buf(),
    })?;
    if name.contains(' ') || name.contains('/') {
        log::warn!("module name '{name}' contains a space or slash");
    }

    let buildsystem = match (raw.buildsystem, raw.cmake) {
        (Some(explicit), _) => explicit,
        (None, Some(true)) => BuildSystem::Cmake,
        (None, _) => BuildSystem::default(),
    };

    Ok(Module {
        name,
        subdir: raw.subdir,
        buildsystem,
        build_options: raw.build_options,
        config_opts: raw.config_opts,
        make_args: raw.make_args,
        make_install_args: raw.make_install_args,
        install_rule: raw.install_rule,
        test_rule: raw.test_rule,
        post_install: raw.post_install,
        build_commands: raw.build_commands,
        test_commands: raw.test_commands,
        cleanup: raw.cleanup,
        cleanup_platform: raw.cleanup_platform,
        ensure_writable: raw.ensure_writable,
        only_arches: raw.only_arches,
        skip_arches: raw.skip_arches,
        disabled: raw.disabled,
        rm_configure: raw.rm_configure,
        no_autogen: raw.no_autogen,
        no_parallel_make: raw.no_parallel_make,
        no_make_install: raw.no_make_install,
        no_python_timestamp_fix: raw.no_python_timestamp_fix,
        builddir: raw.builddir,
        run_tests: raw.run_tests,
        sources: resolve_sources(raw.sources, base_dir)?,
        modules: resolve_modules(raw.modules, base_dir)?,
        change_set: None,
    })
}

fn check_unique_names(modules: &[Module]) -> error::Result<()> {
    let mut seen = HashSet::new();
    let mut all = Vec::new();
    for module in modules {
        module.names_recursive(&mut all);
    }
    for name in all {
        if !seen.insert(name) {
            return DuplicateModuleSnafu { name: name.to_string() }.fail();
        }
    }
    Ok(())
}

/// Load a manifest from `path`, expanding every string-path include in
/// `modules`/`sources` recursively, and validate the result.
pub fn load(path: &Path) -> error::Result<Manifest> {
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let value = read_json_value(path)?;
    let raw: RawManifest = serde_json::from_value(value).context(ParseJsonSnafu {
        path: path.to_path_buf(),
    })?;
    validate(raw, &base_dir)
}

fn validate(raw: RawManifest, base_dir: &Path) -> error::Result<Manifest> {
    if raw.build_runtime && raw.build_extension {
        return ConflictingBuildFlagsSnafu.fail();
    }

    let modules = resolve_modules(raw.modules, base_dir)?;
    check_unique_names(&modules)?;

    let id = raw.id.context(MissingFieldSnafu { field: "id" })?;
    let runtime = raw.runtime.context(MissingFieldSnafu { field: "runtime" })?;
    let sdk = raw.sdk.context(MissingFieldSnafu { field: "sdk" })?;

    let add_extensions = raw
        .add_extensions
        .into_iter()
        .map(|(name, mut ext)| {
            ext.at_build_time = false;
            (name, ext)
        })
        .collect();
    let add_build_extensions = raw
        .add_build_extensions
        .into_iter()
        .map(|(name, mut ext)| {
            ext.at_build_time = true;
            (name, ext)
        })
        .collect();

    Ok(Manifest {
        id,
        id_platform: raw.id_platform,
        branch: raw.branch.unwrap_or_else(|| "master".to_string()),
        collection_id: raw.collection_id,
        extension_tag: raw.extension_tag,
        runtime,
        runtime_version: raw.runtime_version.unwrap_or_else(|| "master".to_string()),
        runtime_commit: raw.runtime_commit,
        sdk,
        sdk_commit: raw.sdk_commit,
        base: raw.base,
        base_version: raw.base_version,
        base_commit: raw.base_commit,
        var: raw.var,
        build_options: raw.build_options,
        metadata: raw.metadata,
        metadata_platform: raw.metadata_platform,
        build_runtime: raw.build_runtime,
        build_extension: raw.build_extension,
        writable_sdk: raw.writable_sdk,
        separate_locales: raw.separate_locales.unwrap_or(true),
        appstream_compose: raw.appstream_compose.unwrap_or(true),
        sdk_extensions: raw.sdk_extensions,
        platform_extensions: raw.platform_extensions,
        base_extensions: raw.base_extensions,
        inherit_extensions: raw.inherit_extensions,
        inherit_sdk_extensions: raw.inherit_sdk_extensions,
        tags: raw.tags,
        finish_args: raw.finish_args,
        cleanup: raw.cleanup,
        cleanup_commands: raw.cleanup_commands,
        cleanup_platform: raw.cleanup_platform,
        prepare_platform_commands: raw.prepare_platform_commands,
        cleanup_platform_commands: raw.cleanup_platform_commands,
        rename_desktop_file: raw.rename_desktop_file,
        rename_appdata_file: raw.rename_appdata_file,
        rename_icon: raw.rename_icon,
        appdata_license: raw.appdata_license,
        modules,
        add_extensions,
        add_build_extensions,
        command: raw.command,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn minimal(extra: &str) -> String {
        format!(
            r#"{{"id": "org.example.App", "runtime": "org.example.Runtime", "sdk": "org.example.Sdk", {extra}}}"#
        )
    }

    #[test]
    fn loads_minimal_manifest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.json");
        fs::write(&path, minimal(r#""modules": []"#)).unwrap();

        let manifest = load(&path).unwrap();
        assert_eq!(manifest.id, "org.example.App");
        assert_eq!(manifest.branch, "master");
        assert!(manifest.separate_locales);
        assert!(manifest.appstream_compose);
        assert!(manifest.modules.is_empty());
    }

    #[test]
    fn rejects_missing_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.json");
        fs::write(&path, r#"{"runtime": "r", "sdk": "s", "modules": []}"#).unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, error::Error::MissingField { field: "id" }));
    }

    #[test]
    fn rejects_conflicting_build_flags() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.json");
        fs::write(
            &path,
            minimal(r#""modules": [], "build-runtime": true, "build-extension": true"#),
        )
        .unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, error::Error::ConflictingBuildFlags));
    }

    #[test]
    fn rejects_duplicate_module_names_across_depth() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.json");
        fs::write(
            &path,
            minimal(
                r#""modules": [
                    {"name": "a", "modules": [{"name": "dup"}]},
                    {"name": "dup"}
                ]"#,
            ),
        )
        .unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, error::Error::DuplicateModule { .. }));
    }

    #[test]
    fn resolves_string_path_module_include() {
        let dir = tempdir().unwrap();
        let included_path = dir.path().join("mod-foo.json");
        fs::write(&included_path, r#"{"name": "foo", "buildsystem": "cmake"}"#).unwrap();

        let path = dir.path().join("app.json");
        fs::write(&path, minimal(r#""modules": ["mod-foo.json"]"#)).unwrap();

        let manifest = load(&path).unwrap();
        assert_eq!(manifest.modules.len(), 1);
        assert_eq!(manifest.modules[0].name, "foo");
        assert_eq!(manifest.modules[0].buildsystem, BuildSystem::Cmake);
    }

    #[test]
    fn resolves_array_of_modules_in_one_include() {
        let dir = tempdir().unwrap();
        let included_path = dir.path().join("mods.json");
        fs::write(&included_path, r#"[{"name": "a"}, {"name": "b"}]"#).unwrap();

        let path = dir.path().join("app.json");
        fs::write(&path, minimal(r#""modules": ["mods.json"]"#)).unwrap();

        let manifest = load(&path).unwrap();
        assert_eq!(manifest.modules.len(), 2);
        assert_eq!(manifest.modules[0].name, "a");
        assert_eq!(manifest.modules[1].name, "b");
    }

    #[test]
    fn nested_include_resolves_relative_to_its_own_directory() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("inner.json"), r#"{"name": "inner"}"#).unwrap();
        fs::write(
            dir.path().join("outer.json"),
            r#"{"name": "outer", "modules": ["inner.json"]}"#,
        )
        .unwrap();

        let path = dir.path().join("app.json");
        fs::write(&path, minimal(r#""modules": ["outer.json"]"#)).unwrap();

        let manifest = load(&path).unwrap();
        assert_eq!(manifest.modules.len(), 1);
        assert_eq!(manifest.modules[0].name, "outer");
        assert_eq!(manifest.modules[0].modules[0].name, "inner");
    }

    #[test]
    fn legacy_cmake_boolean_selects_cmake_buildsystem() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.json");
        fs::write(&path, minimal(r#""modules": [{"name": "m", "cmake": true}]"#)).unwrap();

        let manifest = load(&path).unwrap();
        assert_eq!(manifest.modules[0].buildsystem, BuildSystem::Cmake);
    }

    #[test]
    fn vacuous_module_has_no_sources_and_is_not_simple() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.json");
        fs::write(&path, minimal(r#""modules": [{"name": "m"}]"#)).unwrap();

        let manifest = load(&path).unwrap();
        assert!(manifest.modules[0].is_vacuous());
    }

    #[test]
    fn build_options_arch_override_merges_scalars_and_concatenates_lists() {
        let base = BuildOptions {
            cflags: Some("-O2".to_string()),
            config_opts: vec!["--base".to_string()],
            ..Default::default()
        };
        let mut arch = HashMap::new();
        arch.insert(
            "aarch64".to_string(),
            Box::new(BuildOptions {
                cflags: Some("-O3".to_string()),
                config_opts: vec!["--arch-specific".to_string()],
                ..Default::default()
            }),
        );
        let base = BuildOptions { arch, ..base };

        let resolved = base.for_arch("aarch64");
        assert_eq!(resolved.cflags.as_deref(), Some("-O3"));
        assert_eq!(resolved.config_opts, vec!["--base", "--arch-specific"]);

        let unresolved = base.for_arch("x86_64");
        assert_eq!(unresolved.cflags.as_deref(), Some("-O2"));
        assert_eq!(unresolved.config_opts, vec!["--base"]);
    }
}
