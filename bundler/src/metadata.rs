//! Persisted metadata: the INI-format
//! `metadata` file, sub-extension manifests, the re-serialized manifest
//! snapshot, and bundled-sources provenance.

use anyhow::{Context, Result};
use manifest::Manifest;
use std::fs;
use std::path::Path;

struct IniWriter {
    out: String,
}

impl IniWriter {
    fn new() -> Self {
        IniWriter { out: String::new() }
    }

    fn section(&mut self, name: &str) {
        if !self.out.is_empty() {
            self.out.push('\n');
        }
        self.out.push('[');
        self.out.push_str(name);
        self.out.push_str("]\n");
    }

    fn kv(&mut self, key: &str, value: &str) {
        self.out.push_str(key);
        self.out.push('=');
        self.out.push_str(value);
        self.out.push('\n');
    }

    fn kv_opt(&mut self, key: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.kv(key, value);
        }
    }

    fn kv_bool(&mut self, key: &str, value: bool) {
        if value {
            self.kv(key, "true");
        }
    }
}

fn triple(name: &str, arch: &str, version: &str) -> String {
    format!("{name}/{arch}/{version}")
}

/// Write the top-level `metadata` file (or `metadata.platform` when
/// `file_name` overrides the default), covering `[Runtime]`/`[Application]`,
/// `[ExtensionOf]` (when this manifest itself builds an extension),
/// `[Extension <name>]` per `add-extensions`, and `[Build] built-extensions`.
pub fn write_metadata(root: &Path, manifest: &Manifest, arch: &str, built_extensions: &[String]) -> Result<()> {
    write_metadata_as(root, "metadata", manifest, arch, built_extensions)
}

pub fn write_metadata_as(
    root: &Path,
    file_name: &str,
    manifest: &Manifest,
    arch: &str,
    built_extensions: &[String],
) -> Result<()> {
    let mut ini = IniWriter::new();

    ini.section(if manifest.build_runtime { "Runtime" } else { "Application" });
    ini.kv("name", &manifest.id);
    ini.kv("runtime", &triple(&manifest.runtime, arch, &manifest.runtime_version));
    ini.kv("sdk", &triple(&manifest.sdk, arch, &manifest.runtime_version));
    if let Some(command) = &manifest.command {
        ini.kv("command", command);
    }
    if let Some(base) = &manifest.base {
        let version = manifest.base_version.as_deref().unwrap_or(&manifest.runtime_version);
        ini.kv("base", &triple(base, arch, version));
    }
    if !manifest.tags.is_empty() {
        ini.kv("tags", &manifest.tags.join(";"));
    }

    if manifest.build_extension {
        ini.section("ExtensionOf");
        ini.kv("ref", &triple(&manifest.runtime, arch, &manifest.runtime_version));
        ini.kv_opt("tag", manifest.extension_tag.as_deref());
    }

    for (name, ext) in &manifest.add_extensions {
        ini.section(&format!("Extension {name}"));
        ini.kv_opt("directory", ext.directory.as_deref());
        ini.kv_opt("version", ext.version.as_deref());
        ini.kv_opt("versions", ext.versions.as_deref());
        ini.kv_opt("add-ld-path", ext.add_ld_path.as_deref());
        ini.kv_bool("subdirectories", ext.subdirectories);
        ini.kv_bool("no-autodownload", ext.no_autodownload);
        ini.kv_bool("autodelete", ext.autodelete);
        ini.kv_bool("locale-subset", ext.locale_subset);
    }

    if !built_extensions.is_empty() {
        ini.section("Build");
        ini.kv("built-extensions", &built_extensions.join(";"));
    }

    let path = root.join(file_name);
    fs::write(&path, ini.out).with_context(|| format!("writing '{}'", path.display()))
}

/// Write a sub-extension manifest (`metadata.locale`, `metadata.debuginfo`,
/// or `metadata.<ext>`) describing one extension directory split out of the
/// main tree.
pub fn write_sub_extension_metadata(
    root: &Path,
    file_name: &str,
    extension_id: &str,
    directory: &str,
    version: &str,
) -> Result<()> {
    let mut ini = IniWriter::new();
    ini.section("ExtensionOf");
    ini.kv("ref", extension_id);
    ini.section("Runtime");
    ini.kv("name", extension_id);
    ini.kv("version", version);

    let _ = directory; // recorded via the parent `[Extension <name>]` group, not here

    let path = root.join(file_name);
    fs::write(&path, ini.out).with_context(|| format!("writing '{}'", path.display()))
}

/// Re-serialize the resolved manifest under `files/manifest.json` (app) or
/// `usr/manifest.json` (runtime), rotating any existing file there to
/// `manifest-base-<N>.json` first.
pub fn write_manifest_snapshot(root: &Path, manifest: &Manifest, is_runtime: bool) -> Result<()> {
    let dir = root.join(if is_runtime { "usr" } else { "files" });
    fs::create_dir_all(&dir).with_context(|| format!("creating '{}'", dir.display()))?;
    let target = dir.join("manifest.json");
    if target.is_file() {
        rotate_existing(&dir, &target)?;
    }
    let bytes = serde_json::to_vec_pretty(manifest).context("serializing manifest snapshot")?;
    fs::write(&target, bytes).with_context(|| format!("writing '{}'", target.display()))
}

fn rotate_existing(dir: &Path, target: &Path) -> Result<()> {
    let mut n = 0u64;
    loop {
        let candidate = dir.join(format!("manifest-base-{n}.json"));
        if !candidate.exists() {
            fs::rename(target, &candidate)
                .with_context(|| format!("rotating '{}' to '{}'", target.display(), candidate.display()))?;
            return Ok(());
        }
        n += 1;
    }
}

/// Copy the manifest's original JSON text into `sources/manifest/<id>.json`
/// for provenance, when source-bundling is enabled.
pub fn write_bundled_manifest(root: &Path, id: &str, manifest_text: &str) -> Result<()> {
    let dir = root.join("sources/manifest");
    fs::create_dir_all(&dir).with_context(|| format!("creating '{}'", dir.display()))?;
    let target = dir.join(format!("{id}.json"));
    fs::write(&target, manifest_text).with_context(|| format!("writing '{}'", target.display()))
}

#[cfg(test)]
mod test {
    use super::*;
    use manifest::Extension;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn base_manifest() -> Manifest {
        Manifest {
            id: "org.ex.App".to_string(),
            id_platform: None,
            branch: "master".to_string(),
            collection_id: None,
            extension_tag: None,
            runtime: "org.ex.Runtime".to_string(),
            runtime_version: "1".to_string(),
            runtime_commit: None,
            sdk: "org.ex.Sdk".to_string(),
            sdk_commit: None,
            base: None,
            base_version: None,
            base_commit: None,
            var: None,
            build_options: None,
            metadata: None,
            metadata_platform: None,
            build_runtime: false,
            build_extension: false,
            writable_sdk: false,
            separate_locales: true,
            appstream_compose: true,
            sdk_extensions: Vec::new(),
            platform_extensions: Vec::new(),
            base_extensions: Vec::new(),
            inherit_extensions: Vec::new(),
            inherit_sdk_extensions: Vec::new(),
            tags: Vec::new(),
            finish_args: Vec::new(),
            cleanup: Vec::new(),
            cleanup_commands: Vec::new(),
            cleanup_platform: Vec::new(),
            prepare_platform_commands: Vec::new(),
            cleanup_platform_commands: Vec::new(),
            rename_desktop_file: None,
            rename_appdata_file: None,
            rename_icon: None,
            appdata_license: None,
            modules: Vec::new(),
            add_extensions: HashMap::new(),
            add_build_extensions: HashMap::new(),
            command: None,
        }
    }

    #[test]
    fn writes_application_metadata_with_runtime_and_sdk_triples() {
        let dir = tempdir().unwrap();
        let manifest = base_manifest();
        write_metadata(dir.path(), &manifest, "x86_64", &[]).unwrap();

        let text = fs::read_to_string(dir.path().join("metadata")).unwrap();
        assert!(text.contains("[Application]"));
        assert!(text.contains("runtime=org.ex.Runtime/x86_64/1"));
        assert!(text.contains("sdk=org.ex.Sdk/x86_64/1"));
    }

    #[test]
    fn extension_entries_appear_per_add_extension() {
        let dir = tempdir().unwrap();
        let mut manifest = base_manifest();
        manifest.add_extensions.insert(
            "org.ex.App.Plugin".to_string(),
            Extension {
                directory: Some("plugins".to_string()),
                no_autodownload: true,
                ..Default::default()
            },
        );
        write_metadata(dir.path(), &manifest, "x86_64", &["org.ex.App.Locale".to_string()]).unwrap();

        let text = fs::read_to_string(dir.path().join("metadata")).unwrap();
        assert!(text.contains("[Extension org.ex.App.Plugin]"));
        assert!(text.contains("directory=plugins"));
        assert!(text.contains("no-autodownload=true"));
        assert!(text.contains("[Build]"));
        assert!(text.contains("built-extensions=org.ex.App.Locale"));
    }

    #[test]
    fn manifest_snapshot_rotates_existing_file() {
        let dir = tempdir().unwrap();
        let manifest = base_manifest();
        write_manifest_snapshot(dir.path(), &manifest, false).unwrap();
        write_manifest_snapshot(dir.path(), &manifest, false).unwrap();

        assert!(dir.path().join("files/manifest-base-0.json").is_file());
        assert!(dir.path().join("files/manifest.json").is_file());
    }
}
