/// External process runner shared by native and container builds
///
/// The build pipeline never looks inside a build command; it only cares
/// about the exit status and the captured streams.
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::error::BuildFailure;

/// Streams captured from a finished command
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    pub fn append(&mut self, other: CapturedOutput) {
        self.stdout.extend(other.stdout);
        self.stderr.extend(other.stderr);
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// Run `cmd` to completion with stdin closed and both streams captured
///
/// `label` names the command in errors. A non-zero exit becomes
/// [`BuildFailure::ExitStatus`]; exceeding `timeout` kills the child.
pub async fn run_captured(
    mut cmd: Command,
    label: &str,
    timeout: Option<Duration>,
) -> Result<CapturedOutput, BuildFailure> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(operation = "build", command = %label, "running command");

    let child = cmd.spawn().map_err(|source| BuildFailure::Spawn {
        command: label.to_string(),
        source,
    })?;

    let waited = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result,
            Err(_) => {
                return Err(BuildFailure::TimedOut {
                    command: label.to_string(),
                    timeout: limit,
                })
            }
        },
        None => child.wait_with_output().await,
    };

    let output = waited.map_err(|source| BuildFailure::Spawn {
        command: label.to_string(),
        source,
    })?;

    debug!(
        operation = "build",
        command = %label,
        exit_code = ?output.status.code(),
        stdout_bytes = output.stdout.len(),
        stderr_bytes = output.stderr.len(),
        "command finished"
    );

    if output.status.success() {
        return Ok(CapturedOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }

    Err(match output.status.code() {
        Some(exit_code) => BuildFailure::ExitStatus {
            command: label.to_string(),
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        },
        None => BuildFailure::Signaled {
            command: label.to_string(),
            stdout: output.stdout,
            stderr: output.stderr,
        },
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn test_success_captures_streams() {
        let out = run_captured(sh("echo out; echo err >&2"), "echo", None)
            .await
            .unwrap();
        assert_eq!(out.stdout, b"out\n");
        assert_eq!(out.stderr, b"err\n");
    }

    #[tokio::test]
    async fn test_failure_carries_exit_code_and_output() {
        let err = run_captured(sh("echo broken >&2; exit 3"), "exit 3", None)
            .await
            .unwrap_err();
        match err {
            BuildFailure::ExitStatus {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, b"broken\n");
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let cmd = Command::new("/definitely/not/a/shell");
        let err = run_captured(cmd, "nope", None).await.unwrap_err();
        assert!(matches!(err, BuildFailure::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let err = run_captured(sh("sleep 10"), "sleep", Some(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildFailure::TimedOut { .. }));
    }
}
