/// Configuration merger: CLI args > Env vars > Config file > Defaults
///
/// Environment variables are read by clap into the same fields as the
/// matching flags, so by the time they reach this module CLI and env share
/// one slot and only need to be layered over the config file.
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::CommonArgs;
use crate::config::{parse_duration, ScriptbinConfig};
use crate::script::docker::DockerSettings;
use crate::script::{BuildExecutor, BuildMode, BuildSettings, Launcher, ScriptCache};

/// Fully resolved settings for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedConfig {
    pub cache_dir: PathBuf,
    pub max_age: Duration,
    pub build_mode: BuildMode,
    pub build: BuildSettings,
}

impl MergedConfig {
    /// Merge CLI/env arguments over a loaded config file
    pub fn merge(args: &CommonArgs, file: ScriptbinConfig) -> Result<Self> {
        let cache_dir = args
            .cache_dir
            .clone()
            .or_else(|| file.cache.dir.as_deref().map(PathBuf::from))
            .unwrap_or_else(crate::xdg::cache_dir);

        let timeout = match args.build_timeout.as_deref().or(file.build.timeout.as_deref()) {
            Some(value) => Some(
                parse_duration(value)
                    .with_context(|| format!("Invalid build timeout: {}", value))?,
            ),
            None => None,
        };

        let max_age = parse_duration(&file.cache.max_age)
            .with_context(|| format!("Invalid cache.max_age: {}", file.cache.max_age))?;

        Ok(Self {
            cache_dir,
            max_age,
            build_mode: args.build_mode.unwrap_or_default(),
            build: BuildSettings {
                shell: file.build.shell,
                timeout,
                show_logs: args.show_logs || file.build.show_logs,
                docker: DockerSettings {
                    binary: file.docker.binary,
                    run_as_current_user: file.docker.run_as_current_user,
                },
            },
        })
    }

    /// Load the config file named by `args` (or the default one) and merge
    pub fn load(args: &CommonArgs) -> Result<Self> {
        let file = ScriptbinConfig::load(args.config.as_deref())?;
        Self::merge(args, file)
    }

    pub fn open_cache(&self) -> Result<ScriptCache> {
        ScriptCache::new(&self.cache_dir)
            .with_context(|| format!("Failed to open cache at {}", self.cache_dir.display()))
    }

    pub fn launcher(&self) -> Result<Launcher> {
        Ok(Launcher::new(
            self.open_cache()?,
            BuildExecutor::new(self.build.clone()),
            self.build_mode,
        ))
    }
}
