use clap::{Args, Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

use crate::script::BuildMode;

/// scriptbin - shebang launcher for compiled single-file programs
///
/// A script declares how to build itself in a commented manifest block.
/// scriptbin builds it once, caches the result by content and runs the
/// cached executable on every later invocation.
#[derive(Parser, Debug)]
#[command(name = "scriptbin")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, cache and run single-file programs from a shebang", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Script to run followed by its arguments (shebang form)
    #[arg(value_name = "SCRIPT", trailing_var_arg = true, allow_hyphen_values = true)]
    pub script: Vec<OsString>,
}

/// Settings shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Config file path
    #[arg(long, env = "SCRIPTBIN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Build cache directory
    #[arg(long, env = "SCRIPTBIN_CACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Build mode: default reuses cached builds, source and full always rebuild
    #[arg(long, value_enum, env = "SCRIPTBIN_BUILD", global = true)]
    pub build_mode: Option<BuildMode>,

    /// Wall-clock limit for a build (e.g. "10m")
    #[arg(long, env = "SCRIPTBIN_BUILD_TIMEOUT", global = true)]
    pub build_timeout: Option<String>,

    /// Relay build output to stderr even when the build succeeds
    #[arg(long, env = "SCRIPTBIN_SHOW_BUILD_LOGS", global = true)]
    pub show_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the script if needed, then run it
    Run(RunArgs),

    /// Build the script if needed without running it
    Build(BuildArgs),

    /// Inspect and maintain the build cache
    Cache(CacheArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Script file path
    pub script: PathBuf,

    /// Arguments passed to the script
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<OsString>,
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Script file path
    pub script: PathBuf,
}

#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show the cache entry of a script
    Info {
        /// Script file path
        script: PathBuf,
    },

    /// Print a single item from `info` (e.g. artifact, cache_path)
    Get {
        /// Item name
        item: String,

        /// Script file path
        script: PathBuf,
    },

    /// Remove the cache entry of a script and its container image
    #[command(visible_alias = "clear")]
    Clean {
        /// Script file path
        script: PathBuf,
    },

    /// List committed cache entries
    List,

    /// Remove entries older than the configured max age
    Gc {
        /// Override `[cache] max_age` (e.g. "7d")
        #[arg(long)]
        older_than: Option<String>,
    },
}
