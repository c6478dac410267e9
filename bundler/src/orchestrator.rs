//! Manifest orchestrator: the eight build stages, chained
//! through a running fingerprint key and gated through the object store
//! the same way the module executor gates a single module.

use crate::context::BuildContext;
use crate::executor;
use crate::fingerprinting;
use crate::metadata;
use anyhow::{Context, Result};
use fingerprint::Digest;
use manifest::{BuildOptions, Manifest, Module};
use sandbox::BuildInvocation;
use sources::{BundleContext, DownloadContext};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use store::{Change, Store};

pub type ChangeSets = BTreeMap<String, Vec<PathBuf>>;

fn module_enabled_for_arch(module: &Module, arch: &str) -> bool {
    if !module.only_arches.is_empty() && !module.only_arches.iter().any(|a| a == arch) {
        return false;
    }
    !module.skip_arches.iter().any(|a| a == arch)
}

fn effective_options(base: Option<&BuildOptions>, module: &Module) -> BuildOptions {
    module
        .build_options
        .as_ref()
        .map(|m| base.map(|b| b.merged_with(m)).unwrap_or_else(|| m.clone()))
        .or_else(|| base.cloned())
        .unwrap_or_default()
}

struct Planned<'a> {
    module: &'a Module,
    parent_options: Option<BuildOptions>,
}

fn plan_modules<'a>(
    modules: &'a [Module],
    arch: &str,
    parent_options: Option<&BuildOptions>,
    out: &mut Vec<Planned<'a>>,
) {
    for module in modules {
        if module.disabled || !module_enabled_for_arch(module, arch) {
            continue;
        }
        let own_effective = effective_options(parent_options, module);
        plan_modules(&module.modules, arch, Some(&own_effective), out);
        out.push(Planned {
            module,
            parent_options: parent_options.cloned(),
        });
    }
}

/// Every enabled, arch-filtered module reachable from `modules`, in
/// children-before-parents build order, each paired with the *parent's*
/// resolved build options (`executor::run` merges the module's own
/// options in on top of that).
pub fn flatten_build_order<'a>(
    modules: &'a [Module],
    arch: &str,
    base_options: Option<&BuildOptions>,
) -> Vec<(&'a Module, Option<BuildOptions>)> {
    let mut planned = Vec::new();
    plan_modules(modules, arch, base_options, &mut planned);
    planned
        .into_iter()
        .map(|p| (p.module, p.parent_options))
        .collect()
}

/// Every module reachable from `modules`, enabled or not, declaration
/// order. Cleanup/finish scan the whole declared tree, not just what was
/// actually built this run.
pub fn flatten_all(modules: &[Module]) -> Vec<&Module> {
    fn walk<'a>(modules: &'a [Module], out: &mut Vec<&'a Module>) {
        for module in modules {
            out.push(module);
            walk(&module.modules, out);
        }
    }
    let mut out = Vec::new();
    walk(modules, &mut out);
    out
}

pub fn find_module_by_name<'a>(manifest: &'a Manifest, name: &str) -> Option<&'a Module> {
    fn walk<'a>(modules: &'a [Module], name: &str) -> Option<&'a Module> {
        for module in modules {
            if module.name == name {
                return Some(module);
            }
            if let Some(found) = walk(&module.modules, name) {
                return Some(found);
            }
        }
        None
    }
    walk(&manifest.modules, name)
}

/// Stage 1: resolve `runtime`/`sdk`/`base` commits through the sandbox
/// driver's `info` subcommand. Never cached — the whole point is to find
/// out whether those refs moved since the last run.
pub fn start(ctx: &BuildContext, manifest: &mut Manifest) -> Result<()> {
    manifest.runtime_commit = resolve_commit(ctx, &manifest.runtime, &manifest.runtime_version);
    manifest.sdk_commit = resolve_commit(ctx, &manifest.sdk, &manifest.runtime_version);
    if let Some(base) = manifest.base.clone() {
        let version = manifest
            .base_version
            .clone()
            .unwrap_or_else(|| manifest.runtime_version.clone());
        manifest.base_commit = resolve_commit(ctx, &base, &version);
    }
    Ok(())
}

fn resolve_commit(ctx: &BuildContext, name: &str, version: &str) -> Option<String> {
    let reference = format!("runtime/{name}/{}/{version}", ctx.arch);
    let args = vec![
        "info".to_string(),
        "--arch".to_string(),
        ctx.arch.clone(),
        "--show-commit".to_string(),
        reference,
    ];
    match ctx.sandbox.run(&args) {
        Ok(output) => {
            let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if commit.is_empty() {
                None
            } else {
                Some(commit)
            }
        }
        Err(e) => {
            log::warn!("could not resolve commit for '{name}/{version}': {e}");
            None
        }
    }
}

/// Stage 2: pre-fetch every reachable module's sources. Not cached —
/// `sources::download` is already content-addressed by digest, so there
/// is nothing cheaper than just asking it again.
pub fn download(ctx: &BuildContext, manifest: &Manifest) -> Result<()> {
    if ctx.disable_download {
        log::info!("downloads disabled; skipping download stage");
        return Ok(());
    }
    let download_ctx = DownloadContext {
        state: &ctx.state,
        update_vcs: !ctx.disable_updates,
    };
    for module in flatten_all(&manifest.modules) {
        for source in module
            .sources
            .iter()
            .filter(|s| sources::enabled_for_arch(s, &ctx.arch))
        {
            sources::download(source, &download_ctx)
                .with_context(|| format!("module '{}': downloading source", module.name))?;
        }
    }
    Ok(())
}

/// Stage 3: `build-init` the app directory.
pub fn init_app_dir(ctx: &BuildContext, store: &mut Store, manifest: &Manifest) -> Result<Digest> {
    let stage_key = fingerprinting::stage_key(None, "init-app-dir", manifest, &ctx.arch);
    if store
        .lookup(stage_key.as_str())
        .context("init-app-dir: cache lookup")?
    {
        log::info!("Cache hit for stage 'init-app-dir'");
        return Ok(stage_key);
    }

    std::fs::create_dir_all(&ctx.app_dir).context("creating app directory")?;

    let mut args = vec![
        "build-init".to_string(),
        ctx.app_dir.display().to_string(),
        manifest.id.clone(),
        manifest.sdk.clone(),
        manifest.runtime.clone(),
        manifest.runtime_version.clone(),
    ];
    if manifest.build_extension {
        args.push(format!("--extension={}", manifest.id));
        if let Some(tag) = &manifest.extension_tag {
            args.push(format!("--extension-tag={tag}"));
        }
    }
    if let Some(base) = &manifest.base {
        args.push(format!("--base={base}"));
        if let Some(version) = &manifest.base_version {
            args.push(format!("--base-version={version}"));
        }
    }
    if manifest.writable_sdk {
        args.push("--writable-sdk".to_string());
    }
    for ext in &manifest.sdk_extensions {
        args.push(format!("--sdk-extension={ext}"));
    }

    ctx.sandbox.run(&args).context("build-init")?;

    let commit_key = store
        .commit("Initialize app dir")
        .context("init-app-dir: commit")?;
    debug_assert_eq!(commit_key, stage_key.as_str());
    Ok(stage_key)
}

pub struct BuildModulesOutcome {
    pub key: Digest,
    pub change_sets: ChangeSets,
    pub stopped: bool,
}

/// Stage 4: build every enabled module, children before parents,
/// chaining the running key through `executor::run`.
pub fn build_modules(
    ctx: &BuildContext,
    store: &mut Store,
    manifest: &Manifest,
    parent_key: &Digest,
    stop_at: Option<&str>,
    stop_after: Option<&str>,
) -> Result<BuildModulesOutcome> {
    let planned = flatten_build_order(&manifest.modules, &ctx.arch, manifest.build_options.as_ref());
    let mut key = parent_key.clone();
    let mut change_sets = ChangeSets::new();
    let mut stopped = false;

    for (module, base_options) in planned {
        if stop_at == Some(module.name.as_str()) {
            log::info!("Stopping at module {}", module.name);
            stopped = true;
            break;
        }

        let result = executor::run(
            ctx,
            store,
            module,
            Some(&key),
            base_options.as_ref(),
            manifest.is_runtime(),
            manifest.separate_locales,
        )
        .with_context(|| format!("module '{}'", module.name))?;
        key = result.key;
        change_sets.insert(module.name.clone(), result.change_set);

        if stop_after == Some(module.name.as_str()) {
            log::info!("stopping after module '{}'", module.name);
            stopped = true;
            break;
        }
    }

    Ok(BuildModulesOutcome {
        key,
        change_sets,
        stopped,
    })
}

fn plain_invocation<'a>(dir: &'a Path) -> BuildInvocation<'a> {
    BuildInvocation {
        app_dir: Some(dir),
        source_dir: dir,
        alias: None,
        subdir: None,
        ccache_dir: None,
        envs: BTreeMap::new(),
        extra_args: Vec::new(),
    }
}

/// Stage 5: cleanup patterns, cleanup-commands, renames, appdata license
/// injection, and an `appstream-compose` pass over the finished tree.
pub fn cleanup(ctx: &BuildContext, store: &mut Store, manifest: &Manifest, parent_key: &Digest) -> Result<Digest> {
    let stage_key = fingerprinting::stage_key(Some(parent_key), "cleanup", manifest, &ctx.arch);
    if store
        .lookup(stage_key.as_str())
        .context("cleanup: cache lookup")?
    {
        log::info!("Cache hit for stage 'cleanup'");
        return Ok(stage_key);
    }

    let root = ctx.app_dir.join(if manifest.is_runtime() { "usr" } else { "files" });

    let mut patterns = manifest.cleanup.clone();
    for module in flatten_all(&manifest.modules) {
        patterns.extend(module.cleanup.iter().cloned());
    }
    let matched = cleanup::expand(&root, &patterns);
    cleanup::apply(&root, &matched).context("applying cleanup patterns")?;

    let inv = plain_invocation(&ctx.app_dir);
    for (i, cmd) in manifest.cleanup_commands.iter().enumerate() {
        ctx.sandbox
            .command(&inv, cmd)
            .with_context(|| format!("cleanup-commands[{i}]"))?;
    }

    if let Some(rename) = &manifest.rename_desktop_file {
        cleanup::rename_single_file(&root.join("share/applications"), rename, &manifest.id, "desktop")?;
    }
    if let Some(rename) = &manifest.rename_appdata_file {
        cleanup::rename_single_file(&root.join("share/metainfo"), rename, &manifest.id, "metainfo.xml")?;
        cleanup::rename_single_file(&root.join("share/appdata"), rename, &manifest.id, "appdata.xml")?;
    }
    if let Some(icon) = &manifest.rename_icon {
        cleanup::rename_icon(&root, icon, &manifest.id)?;
    }
    if let Some(license) = &manifest.appdata_license {
        inject_project_license(&root, license).context("injecting appdata project license")?;
    }
    if manifest.appstream_compose {
        run_appstream_compose(&root);
    }

    let commit_key = store.commit("Cleanup").context("cleanup: commit")?;
    debug_assert_eq!(commit_key, stage_key.as_str());
    Ok(stage_key)
}

fn inject_project_license(root: &Path, license: &str) -> Result<()> {
    for dir in ["share/metainfo", "share/appdata"] {
        let dir_path = root.join(dir);
        if !dir_path.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&dir_path)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("xml") {
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            if text.contains("<project_license>") {
                continue;
            }
            let Some(pos) = text.find("</component>") else {
                continue;
            };
            let mut updated = text;
            updated.insert_str(pos, &format!("  <project_license>{license}</project_license>\n"));
            std::fs::write(&path, updated)?;
        }
    }
    Ok(())
}

fn run_appstream_compose(root: &Path) {
    if !root.join("share/metainfo").is_dir() {
        return;
    }
    let Ok(binary) = which::which("appstream-compose") else {
        log::warn!("appstream-compose not found on PATH; leaving appstream data uncomposed");
        return;
    };
    let origin = root.join("share/app-info/xmls");
    if let Err(e) = std::fs::create_dir_all(&origin) {
        log::warn!("could not create '{}': {e}", origin.display());
        return;
    }
    let result = duct::cmd(
        binary.as_path(),
        ["--prefix".to_string(), root.display().to_string(), "--origin".to_string(), "flatpak".to_string()],
    )
    .unchecked()
    .run();
    match result {
        Ok(output) if !output.status.success() => log::warn!("appstream-compose exited unsuccessfully"),
        Err(e) => log::warn!("appstream-compose failed to run: {e}"),
        _ => {}
    }
}

fn compute_built_extensions(app_dir: &Path, manifest: &Manifest) -> Vec<String> {
    let root = app_dir.join(if manifest.is_runtime() { "usr" } else { "files" });
    let mut built = Vec::new();
    if root.join("share/runtime/locale").is_dir() {
        built.push(format!("{}.Locale", manifest.id));
    }
    if root.join("lib/debug").is_dir() {
        built.push(format!("{}.Debug", manifest.id));
    }
    built
}

/// Stage 6: `build-finish`, the persisted `metadata`/sub-extension files,
/// and the re-serialized manifest snapshot.
pub fn finish(
    ctx: &BuildContext,
    store: &mut Store,
    manifest: &Manifest,
    parent_key: &Digest,
) -> Result<(Digest, Vec<String>)> {
    let stage_key = fingerprinting::stage_key(Some(parent_key), "finish", manifest, &ctx.arch);
    let built_extensions = compute_built_extensions(&ctx.app_dir, manifest);
    if store
        .lookup(stage_key.as_str())
        .context("finish: cache lookup")?
    {
        log::info!("Cache hit for stage 'finish'");
        return Ok((stage_key, built_extensions));
    }

    let mut args = vec!["build-finish".to_string()];
    if let Some(command) = &manifest.command {
        args.push(format!("--command={command}"));
    }
    args.extend(manifest.finish_args.clone());
    for module in flatten_all(&manifest.modules) {
        for source in &module.sources {
            args.extend(sources::finish_args(source));
        }
    }
    args.push(ctx.app_dir.display().to_string());
    ctx.sandbox.run(&args).context("build-finish")?;

    metadata::write_metadata(&ctx.app_dir, manifest, &ctx.arch, &built_extensions).context("writing metadata")?;

    if built_extensions.iter().any(|e| e.ends_with(".Locale")) {
        metadata::write_sub_extension_metadata(
            &ctx.app_dir,
            "metadata.locale",
            &format!("{}.Locale", manifest.id),
            "share/runtime/locale",
            &manifest.runtime_version,
        )
        .context("writing locale sub-extension metadata")?;
    }
    if built_extensions.iter().any(|e| e.ends_with(".Debug")) {
        metadata::write_sub_extension_metadata(
            &ctx.app_dir,
            "metadata.debuginfo",
            &format!("{}.Debug", manifest.id),
            "lib/debug",
            &manifest.runtime_version,
        )
        .context("writing debuginfo sub-extension metadata")?;
    }

    metadata::write_manifest_snapshot(&ctx.app_dir, manifest, manifest.is_runtime())
        .context("writing manifest snapshot")?;

    let commit_key = store.commit("Finish").context("finish: commit")?;
    debug_assert_eq!(commit_key, stage_key.as_str());
    Ok((stage_key, built_extensions))
}

/// Stage 7: build a matching platform runtime out of the accumulated
/// `usr/**` tree, when this manifest both builds a runtime and names an
/// `id-platform`.
pub fn platform(
    ctx: &BuildContext,
    store: &mut Store,
    manifest: &Manifest,
    parent_key: &Digest,
) -> Result<Option<Digest>> {
    if !manifest.is_runtime() {
        return Ok(None);
    }
    let Some(platform_id) = manifest.id_platform.clone() else {
        return Ok(None);
    };

    let stage_key = fingerprinting::stage_key(Some(parent_key), "platform", manifest, &ctx.arch);
    if store
        .lookup(stage_key.as_str())
        .context("platform: cache lookup")?
    {
        log::info!("Cache hit for stage 'platform'");
        return Ok(Some(stage_key));
    }

    let platform_dir = ctx
        .app_dir
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(&platform_id);
    std::fs::create_dir_all(&platform_dir).context("creating platform directory")?;

    ctx.sandbox
        .run(&[
            "build-init".to_string(),
            platform_dir.display().to_string(),
            platform_id.clone(),
            manifest.sdk.clone(),
            manifest.runtime.clone(),
            manifest.runtime_version.clone(),
            "--sdk-dir=platform".to_string(),
        ])
        .context("build-init (platform)")?;

    let mut platform_cleanup = manifest.cleanup_platform.clone();
    for module in flatten_all(&manifest.modules) {
        platform_cleanup.extend(module.cleanup_platform.iter().cloned());
    }

    let usr_root = ctx.app_dir.join("usr");
    for change in store.get_all_changes() {
        let path = match &change {
            Change::Removed(_) => continue,
            other => other.path(),
        };
        let Ok(rel) = path.strip_prefix("usr") else {
            continue;
        };
        if rel.as_os_str().is_empty() || platform_cleanup.iter().any(|p| cleanup::matches_pattern(rel, p)) {
            continue;
        }
        let src = usr_root.join(rel);
        if !src.is_file() {
            continue;
        }
        let dest = platform_dir.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating '{}'", parent.display()))?;
        }
        std::fs::copy(&src, &dest)
            .with_context(|| format!("copying '{}' into platform tree", rel.display()))?;
    }

    for (i, cmd) in manifest.prepare_platform_commands.iter().enumerate() {
        let inv = plain_invocation(&platform_dir);
        ctx.sandbox
            .command(&inv, cmd)
            .with_context(|| format!("prepare-platform-commands[{i}]"))?;
    }

    let matched = cleanup::expand(&platform_dir, &platform_cleanup);
    cleanup::apply(&platform_dir, &matched).context("applying platform cleanup patterns")?;

    for (i, cmd) in manifest.cleanup_platform_commands.iter().enumerate() {
        let inv = plain_invocation(&platform_dir);
        ctx.sandbox
            .command(&inv, cmd)
            .with_context(|| format!("cleanup-platform-commands[{i}]"))?;
    }

    metadata::write_metadata_as(&platform_dir, "metadata", manifest, &ctx.arch, &[])
        .context("writing platform metadata")?;

    let commit_key = store.commit("Platform").context("platform: commit")?;
    debug_assert_eq!(commit_key, stage_key.as_str());
    Ok(Some(stage_key))
}

/// Stage 8: embed original source archives and the manifest text for
/// provenance, when `--bundle-sources` was requested.
pub fn bundle_sources(
    ctx: &BuildContext,
    store: &mut Store,
    manifest: &Manifest,
    parent_key: &Digest,
    manifest_text: &str,
    built_extensions: &[String],
) -> Result<Digest> {
    let stage_key = fingerprinting::stage_key(Some(parent_key), "bundle-sources", manifest, &ctx.arch);
    if store
        .lookup(stage_key.as_str())
        .context("bundle-sources: cache lookup")?
    {
        log::info!("Cache hit for stage 'bundle-sources'");
        return Ok(stage_key);
    }

    metadata::write_bundled_manifest(&ctx.app_dir, &manifest.id, manifest_text).context("writing bundled manifest")?;

    let dest_dir = ctx.app_dir.join("sources");
    let bundle_ctx = BundleContext { dest_dir: &dest_dir };
    let download_ctx = DownloadContext {
        state: &ctx.state,
        update_vcs: false,
    };
    for module in flatten_all(&manifest.modules) {
        for source in module
            .sources
            .iter()
            .filter(|s| sources::enabled_for_arch(s, &ctx.arch))
        {
            let downloaded = sources::download(source, &download_ctx)
                .with_context(|| format!("module '{}': locating source for bundling", module.name))?;
            sources::bundle(source, downloaded.as_deref(), &bundle_ctx)
                .with_context(|| format!("module '{}': bundling source", module.name))?;
        }
    }

    let mut all_extensions = built_extensions.to_vec();
    all_extensions.push(format!("{}.Sources", manifest.id));
    metadata::write_metadata(&ctx.app_dir, manifest, &ctx.arch, &all_extensions)
        .context("rewriting metadata with bundled-sources extension")?;

    let commit_key = store.commit("Bundle sources").context("bundle-sources: commit")?;
    debug_assert_eq!(commit_key, stage_key.as_str());
    Ok(stage_key)
}

pub struct BuildOutcome {
    pub built_extensions: Vec<String>,
    pub stopped_early: bool,
}

/// Run every stage in order, short-circuiting after `build_modules` if a
/// `--stop-at`/`--stop-after` boundary was hit.
pub fn build(
    ctx: &BuildContext,
    store: &mut Store,
    manifest: &mut Manifest,
    manifest_text: &str,
    stop_at: Option<&str>,
    stop_after: Option<&str>,
    do_bundle_sources: bool,
) -> Result<BuildOutcome> {
    start(ctx, manifest).context("start")?;
    download(ctx, manifest).context("download")?;

    let init_key = init_app_dir(ctx, store, manifest).context("init-app-dir")?;
    let modules_outcome =
        build_modules(ctx, store, manifest, &init_key, stop_at, stop_after).context("build-modules")?;
    if modules_outcome.stopped {
        return Ok(BuildOutcome {
            built_extensions: Vec::new(),
            stopped_early: true,
        });
    }

    let cleanup_key = cleanup(ctx, store, manifest, &modules_outcome.key).context("cleanup")?;
    let (finish_key, mut built_extensions) = finish(ctx, store, manifest, &cleanup_key).context("finish")?;

    let mut last_key = finish_key;
    if let Some(platform_key) = platform(ctx, store, manifest, &last_key).context("platform")? {
        last_key = platform_key;
    }

    if do_bundle_sources {
        bundle_sources(ctx, store, manifest, &last_key, manifest_text, &built_extensions)
            .context("bundle-sources")?;
        built_extensions.push(format!("{}.Sources", manifest.id));
    }

    Ok(BuildOutcome {
        built_extensions,
        stopped_early: false,
    })
}
