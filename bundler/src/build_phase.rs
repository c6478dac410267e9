//! Build phase: the make/ninja invocation, build-commands,
//! make-install, locale migration, and post-install commands.

use crate::configure::run_in;
use anyhow::{Context, Result};
use manifest::{BuildSystem, Module};
use sandbox::{BuildInvocation, SandboxInvoker};

pub(crate) fn make_cmd(buildsystem: BuildSystem) -> Option<&'static str> {
    match buildsystem {
        BuildSystem::Meson | BuildSystem::CmakeNinja => Some("ninja"),
        BuildSystem::Simple => None,
        _ => Some("make"),
    }
}

fn job_flags(buildsystem: BuildSystem, jobs: u32, no_parallel: bool) -> Vec<String> {
    let is_ninja = matches!(buildsystem, BuildSystem::Meson | BuildSystem::CmakeNinja);
    if no_parallel {
        return if is_ninja {
            vec!["-j1".to_string()]
        } else {
            Vec::new()
        };
    }
    if is_ninja {
        vec![format!("-j{jobs}")]
    } else {
        vec![format!("-j{jobs}"), format!("-l{}", jobs * 2)]
    }
}

pub fn build(
    sandbox: &SandboxInvoker,
    inv_base: &BuildInvocation,
    module: &Module,
    jobs: u32,
) -> Result<()> {
    let Some(make) = make_cmd(module.buildsystem) else {
        for (i, cmd) in module.build_commands.iter().enumerate() {
            run_in(sandbox, inv_base, module, cmd)
                .with_context(|| format!("build-commands[{i}]"))?;
        }
        return Ok(());
    };

    let mut cmd = make.to_string();
    for flag in job_flags(module.buildsystem, jobs, module.no_parallel_make) {
        cmd.push(' ');
        cmd.push_str(&flag);
    }
    for arg in &module.make_args {
        cmd.push(' ');
        cmd.push_str(arg);
    }
    run_in(sandbox, inv_base, module, &cmd).context("running build")?;

    for (i, cmd) in module.build_commands.iter().enumerate() {
        run_in(sandbox, inv_base, module, cmd).with_context(|| format!("build-commands[{i}]"))?;
    }

    if !module.no_make_install {
        let rule = module.install_rule.as_deref().unwrap_or("install");
        let mut cmd = format!("{make} {rule}");
        for arg in &module.make_install_args {
            cmd.push(' ');
            cmd.push_str(arg);
        }
        run_in(sandbox, inv_base, module, &cmd).context("running make install")?;
    }

    for (i, cmd) in module.post_install.iter().enumerate() {
        run_in(sandbox, inv_base, module, cmd).with_context(|| format!("post-install[{i}]"))?;
    }

    Ok(())
}

/// An interactive `/bin/sh` in the sandbox, replacing this process, for
/// the `run-shell` escape hatch.
pub fn run_shell(sandbox: &SandboxInvoker, inv_base: &BuildInvocation, module: &Module) -> Result<()> {
    let subdir = crate::configure::work_subdir(module);
    let inv = BuildInvocation {
        app_dir: inv_base.app_dir,
        source_dir: inv_base.source_dir,
        alias: inv_base.alias,
        subdir: subdir.as_deref(),
        ccache_dir: inv_base.ccache_dir,
        envs: inv_base.envs.clone(),
        extra_args: inv_base.extra_args.clone(),
    };
    sandbox
        .exec(&inv, &["/bin/sh".to_string()])
        .context("exec'ing interactive shell")
}
