//! Per-invocation runtime configuration: resolved paths, the target arch,
//! the sandbox invoker, and the handful of environment variables the
//! component contract says must be set for the life of the process (see
//! component contract's environment variables).

use anyhow::{Context, Result};
use sandbox::SandboxInvoker;
use state_layout::StateLayout;
use std::path::PathBuf;

use crate::args::Common;

/// Everything a build invocation needs that is not specific to one
/// module or one stage.
pub struct BuildContext {
    pub manifest_path: PathBuf,
    pub app_dir: PathBuf,
    pub arch: String,
    pub state: StateLayout,
    pub sandbox: SandboxInvoker,
    pub disable_download: bool,
    pub disable_updates: bool,
    pub jobs: u32,
    pub ccache_binary: Option<PathBuf>,
    /// Retention override for per-module build directories: always delete
    /// on success unless set. Not yet exposed on the CLI (the manifest names
    /// `keep-build-dirs` as a manifest-level knob this crate has no field
    /// for), so this defaults to `false`.
    pub keep_build_dirs: bool,
}

impl BuildContext {
    pub fn new(common: &Common) -> Result<Self> {
        // Avoid a GVfs/D-Bus race that shows up when many bundler
        // invocations share a session bus; flatpak-builder sets this for
        // the same reason.
        std::env::set_var("GIO_USE_VFS", "local");

        let app_dir = match &common.appdir {
            Some(dir) => dir.clone(),
            None => default_app_dir(&common.manifest)?,
        };
        let state_root = common
            .state_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".bundler-builder"));
        let state = StateLayout::new(state_root);
        state.ensure().context("failed to create state directory layout")?;

        let arch = common.arch.clone().unwrap_or_else(host_arch);
        let sandbox = SandboxInvoker::new(sandbox::DEFAULT_DRIVER);
        sandbox
            .resolve()
            .context("sandbox driver not found on PATH")?;

        let ccache_binary = which::which("ccache").ok();
        if let Some(binary) = &ccache_binary {
            state
                .write_ccache_layout(binary)
                .context("failed to set up ccache layout")?;
        } else {
            log::warn!("ccache not found on PATH; builds will not be compiler-cached");
        }

        Ok(BuildContext {
            manifest_path: common.manifest.clone(),
            app_dir,
            arch,
            state,
            sandbox,
            disable_download: common.disable_download,
            disable_updates: common.disable_updates,
            jobs: num_cpus::get() as u32,
            ccache_binary,
            keep_build_dirs: false,
        })
    }

    /// The ccache directory to bind-mount, when ccache is both present on
    /// the host and not disabled.
    pub fn ccache_dir(&self) -> Option<PathBuf> {
        self.ccache_binary.as_ref().map(|_| self.state.ccache())
    }
}

fn default_app_dir(manifest_path: &std::path::Path) -> Result<PathBuf> {
    let stem = manifest_path
        .file_stem()
        .context("manifest path has no file name")?;
    let parent = manifest_path.parent().unwrap_or_else(|| std::path::Path::new("."));
    Ok(parent.join(stem))
}

fn host_arch() -> String {
    match std::env::consts::ARCH {
        "x86_64" => "x86_64".to_string(),
        "aarch64" => "aarch64".to_string(),
        other => other.to_string(),
    }
}
