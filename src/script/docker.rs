/// Container build strategy
///
/// The image is built from the manifest's Dockerfile and named after its
/// content hash, so scripts sharing a Dockerfile share an image. The build
/// command then runs in a throwaway container with the staging directory
/// bind-mounted at `src_mount_dir`.
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::error::BuildFailure;
use super::manifest::DockerBuild;
use super::process::{run_captured, CapturedOutput};

pub const IMAGE_PREFIX: &str = "scriptbin-";
pub const DOCKERFILE_LABEL: &str = "scriptbin.dockerfile-sha256";

/// How to reach the container engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerSettings {
    pub binary: String,
    /// Run the build as the invoking uid:gid so outputs stay owned by the user
    pub run_as_current_user: bool,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            run_as_current_user: true,
        }
    }
}

pub fn dockerfile_digest(dockerfile: &str) -> String {
    hex::encode(Sha256::digest(dockerfile.as_bytes()))
}

pub fn image_name(dockerfile: &str) -> String {
    format!("{}{}", IMAGE_PREFIX, &dockerfile_digest(dockerfile)[..16])
}

pub fn build_image_args(image: &str, dockerfile: &str, context: &Path, no_cache: bool) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        "-t".to_string(),
        image.to_string(),
        "--label".to_string(),
        format!("{}={}", DOCKERFILE_LABEL, dockerfile_digest(dockerfile)),
    ];
    if no_cache {
        args.push("--no-cache".to_string());
    }
    args.push("-f".to_string());
    args.push(context.join("Dockerfile").display().to_string());
    args.push(context.display().to_string());
    args
}

pub fn run_args(
    image: &str,
    staging: &Path,
    docker: &DockerBuild,
    user: Option<(u32, u32)>,
    build_cmd: &str,
) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "-v".to_string(),
        format!("{}:{}", staging.display(), docker.src_mount_dir),
        "-w".to_string(),
        docker.src_mount_dir.clone(),
    ];
    if let Some((uid, gid)) = user {
        args.push("-u".to_string());
        args.push(format!("{}:{}", uid, gid));
    }
    args.extend(docker.extra_args.iter().cloned());
    args.push(image.to_string());
    args.push("sh".to_string());
    args.push("-c".to_string());
    args.push(build_cmd.to_string());
    args
}

/// Resolve the container engine binary or fail without touching anything
pub fn ensure_available(settings: &DockerSettings) -> Result<PathBuf, BuildFailure> {
    which::which(&settings.binary).map_err(|e| BuildFailure::ContainerUnavailable {
        tool: settings.binary.clone(),
        reason: e.to_string(),
    })
}

#[cfg(unix)]
fn current_user() -> Option<(u32, u32)> {
    Some((
        nix::unistd::getuid().as_raw(),
        nix::unistd::getgid().as_raw(),
    ))
}

#[cfg(not(unix))]
fn current_user() -> Option<(u32, u32)> {
    None
}

/// Build the image, then run each build step against `staging`
///
/// Every step gets its own container. Returns the image name and the
/// combined output of all steps.
pub async fn build_in_container(
    settings: &DockerSettings,
    docker: &DockerBuild,
    staging: &Path,
    steps: &[&str],
    no_cache: bool,
    timeout: Option<Duration>,
) -> Result<(String, CapturedOutput), BuildFailure> {
    let engine = ensure_available(settings)?;
    let image = image_name(&docker.dockerfile);

    let context = tempfile::Builder::new()
        .prefix("scriptbin-docker.")
        .tempdir()
        .map_err(|source| BuildFailure::Workspace { source })?;
    fs::write(context.path().join("Dockerfile"), &docker.dockerfile)
        .map_err(|source| BuildFailure::Workspace { source })?;

    info!(operation = "build", image = %image, no_cache, "building container image");
    let mut cmd = Command::new(&engine);
    cmd.args(build_image_args(&image, &docker.dockerfile, context.path(), no_cache));
    let mut output = run_captured(cmd, &format!("{} build", settings.binary), timeout).await?;

    let user = if settings.run_as_current_user {
        current_user()
    } else {
        None
    };
    for step in steps {
        let args = run_args(&image, staging, docker, user, step);
        debug!(operation = "build", image = %image, args = ?args, "running build container");

        let mut cmd = Command::new(&engine);
        cmd.args(args);
        output.append(run_captured(cmd, step, timeout).await?);
    }

    Ok((image, output))
}

/// Best-effort removal of images created for scripts
pub async fn remove_images(settings: &DockerSettings, images: &[String]) -> Result<(), BuildFailure> {
    if images.is_empty() {
        return Ok(());
    }
    let engine = ensure_available(settings)?;
    let mut cmd = Command::new(engine);
    cmd.arg("rmi").args(images);
    run_captured(cmd, &format!("{} rmi", settings.binary), None).await?;
    Ok(())
}
