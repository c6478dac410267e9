//! Command-line surface. Mirrors `twoliter`'s `#[derive(Parser)]` +
//! flattened-common-args shape (see `twoliter/src/cmd/mod.rs`,
//! `tools/buildsys/src/args.rs`), scaled down to the five subcommands and
//! common flags the component contract actually names.

use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

/// Builds declarative application bundles from a module manifest.
#[derive(Debug, Parser)]
#[clap(about, long_about = None, version)]
pub struct Args {
    /// Set the logging level. One of [off|error|warn|info|debug|trace].
    /// Defaults to info. Leave unset and use `RUST_LOG` instead if you
    /// prefer per-module filtering.
    #[clap(long = "log-level", env = "BUNDLER_LOG_LEVEL")]
    pub log_level: Option<LevelFilter>,

    #[clap(flatten)]
    pub common: Common,

    #[clap(subcommand)]
    pub subcommand: Subcommand,
}

/// Flags shared by every subcommand.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// Path to the manifest JSON file.
    pub manifest: PathBuf,

    /// Directory the finished app/runtime tree is written to. Defaults to
    /// `<manifest-stem>/` next to the manifest.
    #[clap(long, env = "BUNDLER_APPDIR")]
    pub appdir: Option<PathBuf>,

    /// Target architecture (as the sandbox driver's `info --arch` would
    /// report it). Defaults to the host architecture.
    #[clap(long, env = "BUNDLER_ARCH")]
    pub arch: Option<String>,

    /// Skip network downloads; only already-cached sources are usable.
    #[clap(long)]
    pub disable_download: bool,

    /// Disable VCS-update checks: git/bzr/svn sources use only local data.
    #[clap(long)]
    pub disable_updates: bool,

    /// Verbose (debug-level) logging, a shorthand for `--log-level=debug`.
    #[clap(short, long)]
    pub verbose: bool,

    /// State directory (downloads/build/cache/checksums/ccache/rofiles).
    /// Defaults to `.bundler-builder` under the current directory.
    #[clap(long, env = "BUNDLER_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Subcommand {
    /// Dump the manifest's canonical JSON after include-expansion.
    Json,

    /// List enabled modules in build order.
    Modules {
        #[clap(long)]
        start_at: Option<String>,
        #[clap(long)]
        start_after: Option<String>,
        #[clap(long)]
        stop_at: Option<String>,
        #[clap(long)]
        stop_after: Option<String>,
        /// Include disabled/arch-filtered modules too.
        #[clap(long)]
        all: bool,
    },

    /// Dump one module's resolved JSON.
    Module { name: String },

    /// Build a single module (and nothing else).
    BuildModule { name: String },

    /// Run the full build pipeline.
    Build {
        #[clap(long)]
        stop_at: Option<String>,
        #[clap(long)]
        stop_after: Option<String>,
        /// Run the bundle-sources stage, embedding original source archives
        /// and the manifest text for provenance.
        #[clap(long)]
        bundle_sources: bool,
    },
}
