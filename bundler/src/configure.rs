//! Configure phase: buildsystem-specific prerequisite
//! detection, autogen fallback, and the configure command itself.

use anyhow::{bail, Context, Result};
use manifest::{BuildOptions, BuildSystem, Module};
use sandbox::{BuildInvocation, SandboxInvoker};
use std::path::Path;

/// Whether this module builds out-of-tree, under `<src>/_flatpak_build`.
pub fn out_of_tree(module: &Module) -> bool {
    module.builddir || module.buildsystem == BuildSystem::Meson
}

/// The subdir (relative to the source root) commands should run in:
/// the module's own `subdir`, optionally with `_flatpak_build` appended
/// for out-of-tree builds.
pub fn work_subdir(module: &Module) -> Option<String> {
    match (&module.subdir, out_of_tree(module)) {
        (Some(sd), true) => Some(format!("{sd}/_flatpak_build")),
        (None, true) => Some("_flatpak_build".to_string()),
        (Some(sd), false) => Some(sd.clone()),
        (None, false) => None,
    }
}

fn default_prefix(is_runtime: bool) -> &'static str {
    if is_runtime {
        "/usr"
    } else {
        "/app"
    }
}

/// Run the configure phase. `source_root` is the absolute host path to the
/// extracted source tree (before the `subdir`/`_flatpak_build` suffix);
/// `inv_base` carries the app-dir/alias/ccache/env shared by every command
/// this module's build issues, with `subdir` overridden per-command here.
pub fn configure(
    sandbox: &SandboxInvoker,
    inv_base: &BuildInvocation,
    source_root: &Path,
    module: &Module,
    options: &BuildOptions,
    is_runtime: bool,
) -> Result<()> {
    if module.buildsystem == BuildSystem::Simple {
        return Ok(());
    }

    let src_dir = match &module.subdir {
        Some(sd) => source_root.join(sd),
        None => source_root.to_path_buf(),
    };
    let work_dir = match work_subdir(module) {
        Some(sub) => source_root.join(&sub),
        None => src_dir.clone(),
    };
    if out_of_tree(module) {
        std::fs::create_dir_all(&work_dir)
            .with_context(|| format!("creating out-of-tree build dir '{}'", work_dir.display()))?;
    }

    let prefix = options
        .prefix
        .clone()
        .unwrap_or_else(|| default_prefix(is_runtime).to_string());
    let libdir = options.libdir.clone();

    if module.buildsystem == BuildSystem::Autotools && module.rm_configure {
        let _ = std::fs::remove_file(src_dir.join("configure"));
    }

    match module.buildsystem {
        BuildSystem::Autotools => {
            if !src_dir.join("configure").is_file() && !module.no_autogen {
                run_autogen(sandbox, inv_base, module, &src_dir)?;
            }
            if !src_dir.join("configure").is_file() {
                bail!(
                    "module '{}': no 'configure' script after autogen",
                    module.name
                );
            }
            let configure = if out_of_tree(module) { "../configure" } else { "./configure" };
            let mut cmd = format!("{configure} --prefix={prefix}");
            if let Some(libdir) = &libdir {
                cmd.push_str(&format!(" --libdir={libdir}"));
            }
            push_opts(&mut cmd, &module.config_opts);
            run_in(sandbox, inv_base, module, &cmd)?;
        }
        BuildSystem::Cmake | BuildSystem::CmakeNinja => {
            if !src_dir.join("CMakeLists.txt").is_file() {
                bail!("module '{}': no CMakeLists.txt", module.name);
            }
            let generator = if module.buildsystem == BuildSystem::CmakeNinja {
                "Ninja"
            } else {
                "Unix Makefiles"
            };
            let srcdir_arg = if out_of_tree(module) { ".." } else { "." };
            let mut cmd = format!("cmake -G '{generator}' -DCMAKE_INSTALL_PREFIX:PATH={prefix}");
            if let Some(libdir) = &libdir {
                cmd.push_str(&format!(" -DCMAKE_INSTALL_LIBDIR:PATH={libdir}"));
            }
            push_opts(&mut cmd, &module.config_opts);
            cmd.push(' ');
            cmd.push_str(srcdir_arg);
            run_in(sandbox, inv_base, module, &cmd)?;
        }
        BuildSystem::Meson => {
            if !src_dir.join("meson.build").is_file() {
                bail!("module '{}': no meson.build", module.name);
            }
            let mut cmd = format!("meson --prefix={prefix}");
            if let Some(libdir) = &libdir {
                cmd.push_str(&format!(" --libdir={libdir}"));
            }
            push_opts(&mut cmd, &module.config_opts);
            cmd.push_str(" ..");
            run_in(sandbox, inv_base, module, &cmd)?;
        }
        BuildSystem::Qmake => {
            let pro_file = find_pro_file(&src_dir)
                .with_context(|| format!("module '{}': no *.pro file found", module.name))?;
            let pro_file = if out_of_tree(module) {
                format!("../{pro_file}")
            } else {
                pro_file
            };
            let mut cmd = format!("qmake PREFIX={prefix}");
            push_opts(&mut cmd, &module.config_opts);
            cmd.push(' ');
            cmd.push_str(&pro_file);
            run_in(sandbox, inv_base, module, &cmd)?;
        }
        BuildSystem::Simple => unreachable!("handled above"),
    }

    verify_followup(&work_dir, module.buildsystem).with_context(|| {
        format!(
            "module '{}': configure did not produce the expected build file",
            module.name
        )
    })?;
    Ok(())
}

fn push_opts(cmd: &mut String, opts: &[String]) {
    for opt in opts {
        cmd.push(' ');
        cmd.push_str(opt);
    }
}

fn run_autogen(
    sandbox: &SandboxInvoker,
    inv_base: &BuildInvocation,
    module: &Module,
    src_dir: &Path,
) -> Result<()> {
    for candidate in ["autogen", "autogen.sh", "bootstrap", "bootstrap.sh"] {
        if src_dir.join(candidate).is_file() {
            let subdir = module.subdir.clone();
            let mut envs = inv_base.envs.clone();
            envs.insert("NOCONFIGURE".to_string(), "1".to_string());
            let inv = BuildInvocation {
                app_dir: inv_base.app_dir,
                source_dir: inv_base.source_dir,
                alias: inv_base.alias,
                subdir: subdir.as_deref(),
                ccache_dir: inv_base.ccache_dir,
                envs,
                extra_args: inv_base.extra_args.clone(),
            };
            sandbox
                .command(&inv, &format!("./{candidate}"))
                .with_context(|| format!("running '{candidate}'"))?;
            return Ok(());
        }
    }
    Ok(())
}

fn find_pro_file(src_dir: &Path) -> Result<String> {
    for entry in std::fs::read_dir(src_dir)?.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("pro") {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                return Ok(name.to_string());
            }
        }
    }
    bail!("no '*.pro' file in '{}'", src_dir.display())
}

fn verify_followup(work_dir: &Path, buildsystem: BuildSystem) -> Result<()> {
    let ninja = matches!(buildsystem, BuildSystem::Meson | BuildSystem::CmakeNinja);
    if ninja {
        if work_dir.join("build.ninja").is_file() {
            return Ok(());
        }
        bail!("expected 'build.ninja' in '{}'", work_dir.display());
    }
    for name in ["Makefile", "makefile", "GNUmakefile"] {
        if work_dir.join(name).is_file() {
            return Ok(());
        }
    }
    bail!("expected a Makefile in '{}'", work_dir.display())
}

/// Run `cmd` with the working directory set to this module's `work_subdir`.
pub(crate) fn run_in(
    sandbox: &SandboxInvoker,
    inv_base: &BuildInvocation,
    module: &Module,
    cmd: &str,
) -> Result<()> {
    let subdir = work_subdir(module);
    let inv = BuildInvocation {
        app_dir: inv_base.app_dir,
        source_dir: inv_base.source_dir,
        alias: inv_base.alias,
        subdir: subdir.as_deref(),
        ccache_dir: inv_base.ccache_dir,
        envs: inv_base.envs.clone(),
        extra_args: inv_base.extra_args.clone(),
    };
    sandbox.command(&inv, cmd).with_context(|| format!("running '{cmd}'"))
}
