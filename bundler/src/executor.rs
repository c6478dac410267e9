//! Module executor: fingerprint, cache probe, extract,
//! configure, build, locale migration, test, post-process, commit.

use crate::build_phase;
use crate::configure;
use crate::context::BuildContext;
use crate::fingerprinting;
use anyhow::{Context, Result};
use fingerprint::Digest;
use manifest::{BuildOptions, Module};
use sandbox::BuildInvocation;
use sources::{DownloadContext, ExtractOutcome};
use std::collections::BTreeMap;
use std::path::Path;
use store::Store;

/// Outcome of running one module through the executor, reported back to
/// the orchestrator for the running-key chain and any `--stop-at` logic.
pub struct ModuleResult {
    pub key: Digest,
    pub change_set: Vec<std::path::PathBuf>,
}

/// Run one module to completion. `parent_key` is the running fingerprint
/// chained in from the previous module (or `init-app-dir`, for the first).
/// `is_runtime` controls the default prefix (`/usr` vs `/app`) and the
/// locale-migration destination.
pub fn run(
    ctx: &BuildContext,
    store: &mut Store,
    module: &Module,
    parent_key: Option<&Digest>,
    base_options: Option<&BuildOptions>,
    is_runtime: bool,
    separate_locales: bool,
) -> Result<ModuleResult> {
    let key = fingerprinting::module_key(parent_key, &ctx.arch, module);

    let hit = store
        .lookup(key.as_str())
        .with_context(|| format!("module '{}': cache lookup", module.name))?;
    if hit {
        log::info!("Cache hit for module '{}'", module.name);
        update_sources(ctx, module)?;
        return Ok(ModuleResult {
            key,
            change_set: store.get_changes(),
        });
    }

    if module.is_vacuous() {
        log::info!("module '{}' has no sources; skipping", module.name);
        let commit_key = store
            .commit(&format!("Built {} (vacuous)", module.name))
            .with_context(|| format!("module '{}': commit", module.name))?;
        debug_assert_eq!(commit_key, key.as_str());
        return Ok(ModuleResult {
            key,
            change_set: store.get_changes(),
        });
    }

    let options = module
        .build_options
        .as_ref()
        .map(|m| base_options.map(|b| b.merged_with(m)).unwrap_or_else(|| m.clone()))
        .or_else(|| base_options.cloned())
        .unwrap_or_default();
    let options = options.for_arch(&ctx.arch);

    if !module.ensure_writable.is_empty() {
        crate::post_process::ensure_writable(&ctx.app_dir, &module.ensure_writable)
            .with_context(|| format!("module '{}': ensure-writable", module.name))?;
    }

    let build_dir = ctx
        .state
        .allocate_build_dir(&module.name)
        .with_context(|| format!("module '{}': allocating build dir", module.name))?;

    let mut cow = cow_workspace::CowWorkspace::new(ctx.state.rofiles(), &ctx.app_dir);
    cow.enable()
        .with_context(|| format!("module '{}': enabling COW workspace", module.name))?;
    let result = run_in_workspace(
        ctx,
        module,
        &options,
        &build_dir,
        is_runtime,
        separate_locales,
        cow.effective_app_dir(),
    );
    let _ = cow.disable();
    result?;

    let commit_key = store
        .commit(&format!("Built {}", module.name))
        .with_context(|| format!("module '{}': commit", module.name))?;
    debug_assert_eq!(commit_key, key.as_str());

    update_sources(ctx, module)?;

    if !ctx.keep_build_dirs {
        let _ = ctx.state.delete_build_dirs(&module.name);
    }

    Ok(ModuleResult {
        key,
        change_set: store.get_changes(),
    })
}

fn run_in_workspace(
    ctx: &BuildContext,
    module: &Module,
    options: &BuildOptions,
    build_dir: &Path,
    is_runtime: bool,
    separate_locales: bool,
    effective_app_dir: &Path,
) -> Result<()> {
    let alias_prefix = if is_runtime { "/run/build-runtime" } else { "/run/build" };
    let alias = format!("{alias_prefix}/{}", module.name);

    let download_ctx = DownloadContext {
        state: &ctx.state,
        update_vcs: !ctx.disable_updates,
    };

    let mut sandbox_commands = Vec::new();
    for source in module.sources.iter().filter(|s| sources::enabled_for_arch(s, &ctx.arch)) {
        let downloaded = if ctx.disable_download {
            None
        } else {
            sources::download(source, &download_ctx)
                .with_context(|| format!("module '{}': downloading source", module.name))?
        };
        let dest = match &source.common().dest {
            Some(d) => build_dir.join(d),
            None => build_dir.to_path_buf(),
        };
        std::fs::create_dir_all(&dest)
            .with_context(|| format!("module '{}': creating source dest dir", module.name))?;
        match sources::extract(source, downloaded.as_deref(), &dest)
            .with_context(|| format!("module '{}': extracting source", module.name))?
        {
            ExtractOutcome::Complete => {}
            ExtractOutcome::RunInSandbox(cmds) => sandbox_commands.extend(cmds),
        }
    }

    let mut envs = BTreeMap::new();
    for (key, value) in &options.env {
        envs.insert(key.clone(), value.clone());
    }
    envs.insert("FLATPAK_BUILDER_N_JOBS".to_string(), ctx.jobs.to_string());

    let ccache_dir = ctx.ccache_dir();
    let inv_base = BuildInvocation {
        app_dir: Some(effective_app_dir),
        source_dir: build_dir,
        alias: Some(&alias),
        subdir: None,
        ccache_dir: ccache_dir.as_deref(),
        envs,
        extra_args: Vec::new(),
    };

    for cmd in &sandbox_commands {
        ctx.sandbox
            .command(&inv_base, cmd)
            .with_context(|| format!("module '{}': running shell-source command", module.name))?;
    }

    configure::configure(&ctx.sandbox, &inv_base, build_dir, module, options, is_runtime)
        .with_context(|| format!("module '{}': configure", module.name))?;

    build_phase::build(&ctx.sandbox, &inv_base, module, ctx.jobs)
        .with_context(|| format!("module '{}': build", module.name))?;

    if separate_locales {
        let root = effective_app_dir.join(if is_runtime { "usr" } else { "files" });
        crate::post_process::migrate_locales(&root)
            .with_context(|| format!("module '{}': migrating locales", module.name))?;
    }

    if module.run_tests {
        run_tests(ctx, &inv_base, module)?;
    }

    let post_process_root = effective_app_dir.join(if is_runtime { "usr" } else { "files" });
    let is_extension = false;
    crate::post_process::post_process(
        &post_process_root,
        options,
        module.no_python_timestamp_fix,
        is_extension,
    )
    .with_context(|| format!("module '{}': post-process", module.name))?;

    Ok(())
}

fn run_tests(ctx: &BuildContext, inv_base: &BuildInvocation, module: &Module) -> Result<()> {
    if !module.test_commands.is_empty() {
        for (i, cmd) in module.test_commands.iter().enumerate() {
            configure::run_in(&ctx.sandbox, inv_base, module, cmd)
                .with_context(|| format!("module '{}': test-commands[{i}]", module.name))?;
        }
        return Ok(());
    }
    if let Some(make) = build_phase::make_cmd(module.buildsystem) {
        let rule = module.test_rule.as_deref().unwrap_or("check");
        configure::run_in(&ctx.sandbox, inv_base, module, &format!("{make} {rule}"))
            .with_context(|| format!("module '{}': make {rule}", module.name))?;
    }
    Ok(())
}

fn update_sources(ctx: &BuildContext, module: &Module) -> Result<()> {
    if ctx.disable_updates {
        return Ok(());
    }
    let download_ctx = DownloadContext {
        state: &ctx.state,
        update_vcs: true,
    };
    for source in module.sources.iter().filter(|s| sources::enabled_for_arch(s, &ctx.arch)) {
        sources::download(source, &download_ctx)
            .with_context(|| format!("module '{}': update", module.name))?;
    }
    Ok(())
}
