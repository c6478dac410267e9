//! Entrypoint: logging init (mirrors `twoliter`'s `init_logger`, adapted
//! to this crate's synchronous, non-tokio `main`), argument parsing, and
//! subcommand dispatch.

mod args;
mod build_phase;
mod cleanup;
mod configure;
mod context;
mod executor;
mod fingerprinting;
mod metadata;
mod orchestrator;
mod post_process;

use anyhow::{bail, Context as _, Result};
use args::{Args, Subcommand};
use clap::Parser;
use context::BuildContext;
use env_logger::Builder;
use log::LevelFilter;
use store::Store;

const DEFAULT_LEVEL_FILTER: LevelFilter = LevelFilter::Info;

/// Use `level` if present, or `RUST_LOG` if present, or a per-crate default.
fn init_logger(level: Option<LevelFilter>, verbose: bool) {
    let level = if verbose { Some(LevelFilter::Debug) } else { level };
    match (std::env::var(env_logger::DEFAULT_FILTER_ENV).ok(), level) {
        (Some(_), None) => {
            Builder::from_default_env().init();
        }
        _ => {
            Builder::new()
                .filter(Some(env!("CARGO_CRATE_NAME")), level.unwrap_or(DEFAULT_LEVEL_FILTER))
                .init();
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.log_level, args.common.verbose);
    run(args)
}

fn run(args: Args) -> Result<()> {
    let manifest = manifest::load(&args.common.manifest).context("loading manifest")?;

    match args.subcommand {
        Subcommand::Json => {
            let text = serde_json::to_string_pretty(&manifest).context("serializing manifest")?;
            println!("{text}");
            Ok(())
        }

        Subcommand::Module { name } => {
            let module = orchestrator::find_module_by_name(&manifest, &name)
                .with_context(|| format!("no such module '{name}'"))?;
            let text = serde_json::to_string_pretty(module).context("serializing module")?;
            println!("{text}");
            Ok(())
        }

        Subcommand::Modules {
            start_at,
            start_after,
            stop_at,
            stop_after,
            all,
        } => {
            let ctx = BuildContext::new(&args.common)?;
            let names: Vec<String> = if all {
                orchestrator::flatten_all(&manifest.modules)
                    .into_iter()
                    .map(|m| m.name.clone())
                    .collect()
            } else {
                orchestrator::flatten_build_order(&manifest.modules, &ctx.arch, manifest.build_options.as_ref())
                    .into_iter()
                    .map(|(m, _)| m.name.clone())
                    .collect()
            };

            let mut started = start_at.is_none() && start_after.is_none();
            for name in names {
                if !started {
                    if start_at.as_deref() == Some(name.as_str()) {
                        started = true;
                    } else if start_after.as_deref() == Some(name.as_str()) {
                        started = true;
                        continue;
                    } else {
                        continue;
                    }
                }
                if stop_at.as_deref() == Some(name.as_str()) {
                    break;
                }
                println!("{name}");
                if stop_after.as_deref() == Some(name.as_str()) {
                    break;
                }
            }
            Ok(())
        }

        Subcommand::BuildModule { name } => {
            let mut manifest = manifest;
            let ctx = BuildContext::new(&args.common)?;
            orchestrator::start(&ctx, &mut manifest).context("start")?;
            orchestrator::download(&ctx, &manifest).context("download")?;

            if orchestrator::find_module_by_name(&manifest, &name).is_none() {
                bail!("no such module '{name}'");
            }

            let mut store = Store::open(&ctx.state.cache().join("store"), &manifest.id, &ctx.app_dir)
                .context("opening object store")?;
            let init_key = orchestrator::init_app_dir(&ctx, &mut store, &manifest).context("init-app-dir")?;
            orchestrator::build_modules(&ctx, &mut store, &manifest, &init_key, None, Some(&name))
                .context("build-modules")?;
            Ok(())
        }

        Subcommand::Build {
            stop_at,
            stop_after,
            bundle_sources,
        } => {
            let manifest_text =
                std::fs::read_to_string(&args.common.manifest).context("reading manifest text")?;
            let mut manifest = manifest;
            let ctx = BuildContext::new(&args.common)?;
            let mut store = Store::open(&ctx.state.cache().join("store"), &manifest.id, &ctx.app_dir)
                .context("opening object store")?;

            let outcome = orchestrator::build(
                &ctx,
                &mut store,
                &mut manifest,
                &manifest_text,
                stop_at.as_deref(),
                stop_after.as_deref(),
                bundle_sources,
            )
            .context("build")?;

            if outcome.stopped_early {
                log::info!("build stopped early as requested");
            } else {
                log::info!(
                    "build complete; extensions built: {}",
                    if outcome.built_extensions.is_empty() {
                        "(none)".to_string()
                    } else {
                        outcome.built_extensions.join(", ")
                    }
                );
            }
            Ok(())
        }
    }
}
