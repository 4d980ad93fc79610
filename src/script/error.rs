/// Error kinds raised by the build-cache-execute pipeline
///
/// Every kind maps to a launcher exit code outside the range a well-behaved
/// script normally uses, so a wrapper can tell "the launcher gave up" apart
/// from "the program ran and failed".
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Exit code for manifest problems (sysexits `EX_DATAERR`)
pub const EXIT_MANIFEST: i32 = 65;
/// Exit code when the script itself cannot be read (sysexits `EX_NOINPUT`)
pub const EXIT_SCRIPT_READ: i32 = 66;
/// Exit code for failed builds (sysexits `EX_SOFTWARE`)
pub const EXIT_BUILD: i32 = 70;
/// Exit code for cache filesystem faults (sysexits `EX_IOERR`)
pub const EXIT_CACHE_IO: i32 = 74;
/// Artifact exists but could not be executed
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
/// Artifact does not exist
pub const EXIT_NOT_FOUND: i32 = 127;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("no `{begin}` ... `{end}` block found in script")]
    ManifestMissing {
        begin: &'static str,
        end: &'static str,
    },

    #[error("malformed build manifest: {0}")]
    ManifestMalformed(String),

    #[error("invalid build manifest: {0}")]
    ManifestInvalid(String),

    #[error("cannot read script {}", path.display())]
    ScriptRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache I/O error: {context}")]
    CacheIo {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("build failed")]
    BuildFailed(#[source] BuildFailure),

    #[error("cannot execute {}", path.display())]
    ExecutionFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Why a build did not produce a stageable artifact
#[derive(Error, Debug)]
pub enum BuildFailure {
    #[error("`{command}` exited with code {exit_code}")]
    ExitStatus {
        command: String,
        exit_code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    #[error("`{command}` was terminated by a signal")]
    Signaled {
        command: String,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    #[error("could not start `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("container tool `{tool}` is not available: {reason}")]
    ContainerUnavailable { tool: String, reason: String },

    #[error("`{command}` timed out after {}s", timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },

    #[error("build succeeded but no artifact was found at {}", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("cannot prepare build directory")]
    Workspace {
        #[source]
        source: io::Error,
    },
}

impl ScriptError {
    pub fn cache_io(context: impl Into<String>, source: io::Error) -> Self {
        ScriptError::CacheIo {
            context: context.into(),
            source,
        }
    }

    /// Launcher exit code for this fault
    pub fn exit_code(&self) -> i32 {
        match self {
            ScriptError::ManifestMissing { .. }
            | ScriptError::ManifestMalformed(_)
            | ScriptError::ManifestInvalid(_) => EXIT_MANIFEST,
            ScriptError::ScriptRead { .. } => EXIT_SCRIPT_READ,
            ScriptError::CacheIo { .. } => EXIT_CACHE_IO,
            ScriptError::BuildFailed(_) => EXIT_BUILD,
            ScriptError::ExecutionFailed { source, .. } => match source.kind() {
                io::ErrorKind::NotFound => EXIT_NOT_FOUND,
                _ => EXIT_NOT_EXECUTABLE,
            },
        }
    }

    /// Captured (stdout, stderr) of a failed build command, if any
    pub fn build_output(&self) -> Option<(&[u8], &[u8])> {
        match self {
            ScriptError::BuildFailed(BuildFailure::ExitStatus { stdout, stderr, .. })
            | ScriptError::BuildFailed(BuildFailure::Signaled { stdout, stderr, .. }) => {
                Some((stdout, stderr))
            }
            _ => None,
        }
    }
}

impl From<BuildFailure> for ScriptError {
    fn from(failure: BuildFailure) -> Self {
        ScriptError::BuildFailed(failure)
    }
}

pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_family() {
        let missing = ScriptError::ManifestMissing {
            begin: "a",
            end: "b",
        };
        assert_eq!(missing.exit_code(), EXIT_MANIFEST);
        assert_eq!(
            ScriptError::ManifestInvalid("x".into()).exit_code(),
            EXIT_MANIFEST
        );
        assert_eq!(
            ScriptError::cache_io("write", io::Error::other("disk full")).exit_code(),
            EXIT_CACHE_IO
        );

        let failed: ScriptError = BuildFailure::ExitStatus {
            command: "exit 3".into(),
            exit_code: 3,
            stdout: vec![],
            stderr: b"boom".to_vec(),
        }
        .into();
        assert_eq!(failed.exit_code(), EXIT_BUILD);
        assert_eq!(failed.build_output().unwrap().1, b"boom");
    }

    #[test]
    fn test_execution_failed_uses_not_found_family() {
        let not_found = ScriptError::ExecutionFailed {
            path: PathBuf::from("/nope"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(not_found.exit_code(), EXIT_NOT_FOUND);

        let denied = ScriptError::ExecutionFailed {
            path: PathBuf::from("/etc/passwd"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(denied.exit_code(), EXIT_NOT_EXECUTABLE);
    }

    #[test]
    fn test_build_failure_message_contains_exit_code() {
        let failed = ScriptError::BuildFailed(BuildFailure::ExitStatus {
            command: "exit 3".into(),
            exit_code: 3,
            stdout: vec![],
            stderr: vec![],
        });
        let chain = format!("{:#}", anyhow::Error::from(failed));
        assert!(chain.starts_with("build failed: "));
        assert!(chain.contains("exited with code 3"));
    }
}
