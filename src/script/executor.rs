/// Build executor
///
/// Materialises the script source into a private staging directory, runs the
/// build command there (natively or in a container) and locates the artifact.
/// Nothing it produces is visible to other launchers until the cache commits
/// the staged directory.
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

use super::cache::{ScriptCache, StagedBuild};
use super::docker::{self, DockerSettings};
use super::error::{ScriptError, ScriptResult};
use super::fingerprint::Fingerprint;
use super::manifest::{DockerBuild, Manifest, ParsedScript};
use super::process::{run_captured, CapturedOutput};
use super::target::TargetCommand;

pub const DEFAULT_SHELL: &str = "/bin/sh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    /// Shell used for native builds (`<shell> -c <build_cmd>`)
    pub shell: String,
    pub timeout: Option<Duration>,
    /// Relay build output to stderr even when the build succeeds
    pub show_logs: bool,
    pub docker: DockerSettings,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            timeout: None,
            show_logs: false,
            docker: DockerSettings::default(),
        }
    }
}

/// Everything the executor needs to know about one script
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub script_path: &'a Path,
    pub text: &'a [u8],
    pub parsed: &'a ParsedScript,
    pub fingerprint: &'a Fingerprint,
}

impl BuildRequest<'_> {
    fn script_dir(&self) -> &Path {
        self.script_path.parent().unwrap_or(Path::new("/"))
    }
}

enum BuildStrategy<'a> {
    Native,
    Container(&'a DockerBuild),
}

impl<'a> BuildStrategy<'a> {
    fn for_manifest(manifest: &'a Manifest) -> Self {
        match &manifest.docker_build {
            Some(docker) => BuildStrategy::Container(docker),
            None => BuildStrategy::Native,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildExecutor {
    settings: BuildSettings,
}

impl BuildExecutor {
    pub fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Run one build into a fresh staging directory
    ///
    /// `fresh_images` asks the container strategy to rebuild its image
    /// without the engine's layer cache. On failure the staging directory is
    /// dropped and nothing is left behind.
    pub async fn build(
        &self,
        cache: &ScriptCache,
        request: BuildRequest<'_>,
        fresh_images: bool,
    ) -> ScriptResult<StagedBuild> {
        let manifest = &request.parsed.manifest;
        let started = Instant::now();
        let staging = cache.stage(request.fingerprint)?;
        let build_dir = cache.build_dir_for(request.fingerprint, staging.path());

        materialize(staging.path(), request)?;
        let steps: Vec<&str> = manifest.build_steps().collect();

        let (output, docker_image) = match BuildStrategy::for_manifest(manifest) {
            BuildStrategy::Native => {
                info!(
                    operation = "build",
                    strategy = "native",
                    fingerprint = %request.fingerprint.short(),
                    command = %manifest.build_cmd,
                    "building script"
                );
                (self.build_native(staging.path(), &steps).await?, None)
            }
            BuildStrategy::Container(docker) => {
                info!(
                    operation = "build",
                    strategy = "container",
                    fingerprint = %request.fingerprint.short(),
                    command = %manifest.build_cmd,
                    "building script"
                );
                let (image, output) = docker::build_in_container(
                    &self.settings.docker,
                    docker,
                    staging.path(),
                    &steps,
                    fresh_images,
                    self.settings.timeout,
                )
                .await?;
                (output, Some(image))
            }
        };

        if self.settings.show_logs {
            relay(&output.stdout, &output.stderr);
        }

        let target = TargetCommand::from_manifest(manifest, &build_dir, request.script_dir())?;
        let artifact = target.locate_artifact(staging.path(), &build_dir)?;

        let build_duration = started.elapsed();
        info!(
            operation = "build",
            status = "success",
            fingerprint = %request.fingerprint.short(),
            duration_ms = build_duration.as_millis() as u64,
            "build finished"
        );

        Ok(StagedBuild {
            dir: staging,
            artifact: artifact.starts_with(&build_dir).then_some(artifact),
            build_dir,
            script_path: request.script_path.to_path_buf(),
            build_duration,
            docker_image,
        })
    }

    async fn build_native(&self, staging: &Path, steps: &[&str]) -> ScriptResult<CapturedOutput> {
        let mut output = CapturedOutput::default();
        for step in steps {
            let mut cmd = Command::new(&self.settings.shell);
            cmd.arg("-c").arg(step).current_dir(staging);
            output.append(run_captured(cmd, step, self.settings.timeout).await?);
        }
        Ok(output)
    }
}

/// Write `script_src` and any extra files into the staging directory
fn materialize(staging: &Path, request: BuildRequest<'_>) -> ScriptResult<()> {
    let manifest = &request.parsed.manifest;
    let source = request.parsed.script_source(request.text);
    write_file(&staging.join(&manifest.script_src), &source)?;

    for extra in &manifest.files {
        write_file(&staging.join(&extra.path), extra.content.as_bytes())?;
    }

    debug!(
        operation = "build",
        script_src = %manifest.script_src,
        extra_files = manifest.files.len(),
        "materialized build inputs"
    );
    Ok(())
}

fn write_file(path: &Path, contents: &[u8]) -> ScriptResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ScriptError::cache_io(format!("failed to create {}", parent.display()), e)
        })?;
    }
    fs::write(path, contents)
        .map_err(|e| ScriptError::cache_io(format!("failed to write {}", path.display()), e))
}

/// Copy captured build output to our stderr
pub fn relay(stdout: &[u8], stderr: &[u8]) {
    let mut out = std::io::stderr().lock();
    let _ = out.write_all(stdout);
    let _ = out.write_all(stderr);
    let _ = out.flush();
}
