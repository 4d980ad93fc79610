use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// scriptbin configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ScriptbinConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub docker: DockerConfig,
}

/// Build cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Cache root (defaults to the XDG cache directory)
    #[serde(default)]
    pub dir: Option<String>,

    /// Age after which `cache gc` removes an entry (e.g. "30d")
    #[serde(default = "default_max_age")]
    pub max_age: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_age: default_max_age(),
        }
    }
}

/// Build execution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildConfig {
    /// Shell for native builds
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Wall-clock limit for one build (e.g. "10m"); unset means no limit
    #[serde(default)]
    pub timeout: Option<String>,

    /// Relay build output to stderr on success too
    #[serde(default)]
    pub show_logs: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            timeout: None,
            show_logs: false,
        }
    }
}

/// Container engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DockerConfig {
    #[serde(default = "default_docker_binary")]
    pub binary: String,

    #[serde(default = "default_true")]
    pub run_as_current_user: bool,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
            run_as_current_user: true,
        }
    }
}

fn default_max_age() -> String {
    "30d".to_string()
}

fn default_shell() -> String {
    crate::script::executor::DEFAULT_SHELL.to_string()
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_true() -> bool {
    true
}

impl ScriptbinConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: ScriptbinConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the XDG config file if it exists
    ///
    /// An explicitly named file must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = crate::xdg::config_file();
                if default.exists() {
                    tracing::debug!(path = %default.display(), "loading config");
                    Self::from_file(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        parse_duration(&self.cache.max_age).context("cache.max_age is invalid")?;

        if let Some(timeout) = &self.build.timeout {
            parse_duration(timeout).context("build.timeout is invalid")?;
        }

        if self.build.shell.trim().is_empty() {
            anyhow::bail!("build.shell must not be empty");
        }

        if self.docker.binary.trim().is_empty() {
            anyhow::bail!("docker.binary must not be empty");
        }

        Ok(())
    }
}

/// Parse duration strings like "30s", "10m", "2h", "7d"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let Some((unit_at, _)) = s.char_indices().last() else {
        return Err(anyhow!("Empty duration string"));
    };

    let (num_str, unit) = s.split_at(unit_at);
    let num: u64 = num_str
        .parse()
        .map_err(|_| anyhow!("Invalid duration: {}", s))?;

    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return Err(anyhow!("Invalid duration unit: {}. Use: s, m, h, d", unit)),
    };

    num.checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("Duration out of range: {}", s))
}
