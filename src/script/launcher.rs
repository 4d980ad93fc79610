//! Process launcher.
//!
//! Drives one invocation end to end: read and parse the script, fingerprint
//! it, reuse a committed build or produce one under the per-fingerprint lock,
//! then hand control to the artifact.
//!
//! The cache lookup on the fast path takes no lock. Builds are published by
//! rename, so an unlocked reader sees either a complete build or nothing.
//! Only a miss pays for the lock, and the lookup is repeated once the lock is
//! held so that launchers queued behind a build reuse its result.
//!
//! The artifact path is resolved again on every invocation. Identical
//! scripts in different directories share one cache entry, and a
//! `{script_dir}` target must point at the caller's directory.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::cache::{CacheEntry, ScriptCache};
use super::error::{ScriptError, ScriptResult};
use super::executor::{BuildExecutor, BuildRequest};
use super::fingerprint::Fingerprint;
use super::manifest::{parse_script, ParsedScript};
use super::target::TargetCommand;

/// How the cache participates in a run
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Reuse a committed build when one exists
    #[default]
    Default,
    /// Always rebuild, then commit
    Source,
    /// Always rebuild, including the container image
    Full,
}

impl BuildMode {
    pub fn uses_cache(self) -> bool {
        self == BuildMode::Default
    }
}

/// How control passes to the artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffMode {
    /// Replace the launcher process (unix `exec`)
    Exec,
    /// Run as a child and report its exit code
    Spawn,
}

impl HandoffMode {
    pub fn native() -> Self {
        if cfg!(unix) {
            HandoffMode::Exec
        } else {
            HandoffMode::Spawn
        }
    }
}

/// Command line the artifact is started with, user arguments excluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

/// A script whose build is committed and ready to run
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub script_path: PathBuf,
    pub fingerprint: Fingerprint,
    pub entry: CacheEntry,
    /// Artifact resolved for this invocation
    pub artifact: PathBuf,
    pub command: LaunchCommand,
    /// Whether this invocation ran the build
    pub built: bool,
}

/// A script read from disk and parsed, not yet built
#[derive(Debug, Clone)]
pub struct LoadedScript {
    pub path: PathBuf,
    pub text: Vec<u8>,
    pub parsed: ParsedScript,
    pub fingerprint: Fingerprint,
}

impl LoadedScript {
    pub fn load(script_path: &Path) -> ScriptResult<Self> {
        let read_err = |source: io::Error| ScriptError::ScriptRead {
            path: script_path.to_path_buf(),
            source,
        };
        let text = fs::read(script_path).map_err(read_err)?;
        let path = script_path.canonicalize().map_err(read_err)?;

        let parsed = parse_script(&text)?;
        let fingerprint = Fingerprint::compute(&text);
        debug!(
            operation = "fingerprint",
            script = %path.display(),
            fingerprint = %fingerprint.short(),
            "script fingerprinted"
        );

        Ok(Self {
            path,
            text,
            parsed,
            fingerprint,
        })
    }

    pub fn script_dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("/"))
    }

    /// Artifact this script would run from `entry`, if it can be found
    pub fn installed_artifact(&self, entry: &CacheEntry) -> ScriptResult<Option<PathBuf>> {
        Ok(resolve(self, entry)?.ok().map(|resolved| resolved.artifact))
    }
}

pub struct Launcher {
    cache: ScriptCache,
    executor: BuildExecutor,
    mode: BuildMode,
}

impl Launcher {
    pub fn new(cache: ScriptCache, executor: BuildExecutor, mode: BuildMode) -> Self {
        Self {
            cache,
            executor,
            mode,
        }
    }

    pub fn cache(&self) -> &ScriptCache {
        &self.cache
    }

    /// Make sure a committed build exists for the script and describe how to run it
    pub async fn prepare(&self, script_path: &Path) -> ScriptResult<PreparedRun> {
        let script = LoadedScript::load(script_path)?;
        let (entry, resolved, built) = self.ensure_built(&script).await?;

        Ok(PreparedRun {
            script_path: script.path,
            fingerprint: script.fingerprint,
            entry,
            artifact: resolved.artifact,
            command: resolved.command,
            built,
        })
    }

    async fn ensure_built(&self, script: &LoadedScript) -> ScriptResult<(CacheEntry, Resolved, bool)> {
        let fp = &script.fingerprint;

        if self.mode.uses_cache() {
            if let Some(hit) = self.reuse(script)? {
                return Ok((hit.0, hit.1, false));
            }
        }

        let _lock = {
            let cache = self.cache.clone();
            let fp = fp.clone();
            tokio::task::spawn_blocking(move || cache.acquire_build_lock(&fp))
                .await
                .map_err(|e| ScriptError::cache_io("build lock task failed", io::Error::other(e)))??
        };

        if self.mode.uses_cache() {
            if let Some(hit) = self.reuse(script)? {
                debug!(
                    operation = "cache.lookup",
                    status = "hit",
                    fingerprint = %fp.short(),
                    "built by a concurrent launcher"
                );
                return Ok((hit.0, hit.1, false));
            }
        }

        let request = BuildRequest {
            script_path: &script.path,
            text: &script.text,
            parsed: &script.parsed,
            fingerprint: fp,
        };
        let staged = self
            .executor
            .build(&self.cache, request, self.mode == BuildMode::Full)
            .await?;
        let entry = self.cache.commit(fp, staged)?;

        let resolved = match resolve(script, &entry)? {
            Ok(resolved) => resolved,
            Err(program) => {
                return Err(ScriptError::ExecutionFailed {
                    path: program,
                    source: io::Error::from(io::ErrorKind::NotFound),
                })
            }
        };
        Ok((entry, resolved, true))
    }

    /// Committed build whose artifact resolves for this script
    fn reuse(&self, script: &LoadedScript) -> ScriptResult<Option<(CacheEntry, Resolved)>> {
        let Some(entry) = self.cache.lookup(&script.fingerprint)? else {
            return Ok(None);
        };
        match resolve(script, &entry)? {
            Ok(resolved) => Ok(Some((entry, resolved))),
            Err(program) => {
                info!(
                    operation = "cache.lookup",
                    status = "miss",
                    fingerprint = %script.fingerprint.short(),
                    program = %program.display(),
                    "artifact not found for this script, rebuilding"
                );
                Ok(None)
            }
        }
    }

    /// Build if needed, then hand off to the artifact
    ///
    /// With [`HandoffMode::Exec`] this only returns on failure.
    pub async fn run(&self, script_path: &Path, args: &[OsString], handoff: HandoffMode) -> ScriptResult<i32> {
        let prepared = self.prepare(script_path).await?;
        launch(&prepared, args, handoff).await
    }
}

/// Artifact and command line of one invocation
#[derive(Debug)]
struct Resolved {
    artifact: PathBuf,
    command: LaunchCommand,
}

/// Resolve the script's target against a committed build
///
/// The inner `Err` carries the program that could not be found.
fn resolve(script: &LoadedScript, entry: &CacheEntry) -> ScriptResult<Result<Resolved, PathBuf>> {
    let target = TargetCommand::from_manifest(&script.parsed.manifest, &entry.dir, script.script_dir())?;
    let Some(artifact) = target.resolve_installed(&entry.dir) else {
        return Ok(Err(PathBuf::from(target.program)));
    };

    let leading = target.args.into_iter().map(OsString::from);
    let mut interpreter = target.interpreter.into_iter();
    let command = match interpreter.next() {
        Some(program) => LaunchCommand {
            program: PathBuf::from(program),
            args: interpreter
                .map(OsString::from)
                .chain(std::iter::once(artifact.clone().into_os_string()))
                .chain(leading)
                .collect(),
        },
        None => LaunchCommand {
            program: artifact.clone(),
            args: leading.collect(),
        },
    };
    Ok(Ok(Resolved { artifact, command }))
}

/// Start the prepared artifact with `args` appended
pub async fn launch(prepared: &PreparedRun, args: &[OsString], handoff: HandoffMode) -> ScriptResult<i32> {
    let command = &prepared.command;
    info!(
        operation = "launch",
        fingerprint = %prepared.fingerprint.short(),
        program = %command.program.display(),
        built = prepared.built,
        "starting script"
    );

    let exec_err = |source: io::Error| ScriptError::ExecutionFailed {
        path: command.program.clone(),
        source,
    };

    match handoff {
        #[cfg(unix)]
        HandoffMode::Exec => {
            use std::os::unix::process::CommandExt;
            let err = std::process::Command::new(&command.program)
                .args(&command.args)
                .args(args)
                .exec();
            Err(exec_err(err))
        }
        #[cfg(not(unix))]
        HandoffMode::Exec => Err(exec_err(io::Error::new(
            io::ErrorKind::Unsupported,
            "exec handoff requires a unix platform",
        ))),
        HandoffMode::Spawn => {
            let status = tokio::process::Command::new(&command.program)
                .args(&command.args)
                .args(args)
                .status()
                .await
                .map_err(exec_err)?;
            Ok(exit_code(status))
        }
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
