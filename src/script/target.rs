/// Resolution of `target_bin` / `target_interpreter` into a command line
use std::path::{Component, Path, PathBuf};

use super::error::{BuildFailure, ScriptError, ScriptResult};
use super::manifest::Manifest;

/// Replaced with the committed build directory
pub const BUILD_DIR_PLACEHOLDER: &str = "{build_dir}";
/// Legacy spelling of [`BUILD_DIR_PLACEHOLDER`]
pub const BUILD_DIR_PLACEHOLDER_LEGACY: &str = "@@@";
/// Replaced with the directory that contains the invoked script
pub const SCRIPT_DIR_PLACEHOLDER: &str = "{script_dir}";

/// `target_bin` split into program and leading arguments, plus interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCommand {
    pub program: String,
    pub args: Vec<String>,
    pub interpreter: Vec<String>,
}

impl TargetCommand {
    pub fn from_manifest(manifest: &Manifest, build_dir: &Path, script_dir: &Path) -> ScriptResult<Self> {
        let expanded = expand(manifest.target_bin(), build_dir, script_dir);
        let mut words = expanded.split_whitespace().map(str::to_string);
        let program = words.next().ok_or_else(|| {
            ScriptError::ManifestInvalid("`target_bin` is empty".to_string())
        })?;

        let interpreter = manifest
            .target_interpreter
            .as_deref()
            .map(|i| {
                expand(i, build_dir, script_dir)
                    .split_whitespace()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(TargetCommand {
            program,
            args: words.collect(),
            interpreter,
        })
    }

    /// Find the artifact of a build done in `staging` and return the path it
    /// will have once `staging` is committed as `build_dir`
    ///
    /// Relative programs live in the build directory. A bare name that the
    /// build did not produce is looked up on `PATH` (e.g. `python3 app.py`).
    pub fn locate_artifact(&self, staging: &Path, build_dir: &Path) -> Result<PathBuf, BuildFailure> {
        let program = Path::new(&self.program);

        if program.is_absolute() {
            if let Ok(rel) = program.strip_prefix(build_dir) {
                return in_build_dir(rel, staging, build_dir);
            }
            return if program.exists() {
                Ok(program.to_path_buf())
            } else {
                Err(BuildFailure::MissingArtifact {
                    path: program.to_path_buf(),
                })
            };
        }

        if self.is_bare() && !staging.join(program).exists() {
            return which::which(program).map_err(|_| BuildFailure::MissingArtifact {
                path: staging.join(program),
            });
        }

        in_build_dir(program, staging, build_dir)
    }

    /// Path of the program for a build committed at `build_dir`, `None` if
    /// it is not on disk
    ///
    /// Resolved for every invocation: the same build may be shared by copies
    /// of a script that live in different directories.
    pub fn resolve_installed(&self, build_dir: &Path) -> Option<PathBuf> {
        let program = Path::new(&self.program);
        if program.is_absolute() {
            return program.exists().then(|| program.to_path_buf());
        }

        let installed = build_dir.join(normalize(program));
        if installed.exists() {
            Some(installed)
        } else if self.is_bare() {
            which::which(program).ok()
        } else {
            None
        }
    }

    fn is_bare(&self) -> bool {
        Path::new(&self.program).components().count() == 1 && !self.program.starts_with('.')
    }
}

fn in_build_dir(rel: &Path, staging: &Path, build_dir: &Path) -> Result<PathBuf, BuildFailure> {
    let rel = normalize(rel);
    let staged = staging.join(&rel);
    if staged.exists() {
        Ok(build_dir.join(rel))
    } else {
        Err(BuildFailure::MissingArtifact { path: staged })
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn expand(template: &str, build_dir: &Path, script_dir: &Path) -> String {
    let build_dir = build_dir.to_string_lossy();
    template
        .replace(BUILD_DIR_PLACEHOLDER, &build_dir)
        .replace(BUILD_DIR_PLACEHOLDER_LEGACY, &build_dir)
        .replace(SCRIPT_DIR_PLACEHOLDER, &script_dir.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::manifest::decode_manifest;
    use std::fs;
    use tempfile::TempDir;

    fn manifest(extra: &str) -> Manifest {
        decode_manifest(&format!("script_src: main.c\nbuild_cmd: make\n{}", extra)).unwrap()
    }

    #[test]
    fn test_default_target() {
        let target = TargetCommand::from_manifest(&manifest(""), Path::new("/b"), Path::new("/s")).unwrap();
        assert_eq!(target.program, "./script");
        assert!(target.args.is_empty());
        assert!(target.interpreter.is_empty());
    }

    #[test]
    fn test_placeholders_and_leading_args() {
        let m = manifest("target_bin: \"@@@/app --config {script_dir}/app.toml\"");
        let target = TargetCommand::from_manifest(&m, Path::new("/cache/e1"), Path::new("/home/u")).unwrap();
        assert_eq!(target.program, "/cache/e1/app");
        assert_eq!(target.args, vec!["--config", "/home/u/app.toml"]);

        let m = manifest("target_bin: \"{build_dir}/bin/app\"");
        let target = TargetCommand::from_manifest(&m, Path::new("/cache/e1"), Path::new("/home/u")).unwrap();
        assert_eq!(target.program, "/cache/e1/bin/app");
    }

    #[test]
    fn test_interpreter() {
        let m = manifest("target_bin: ./script.js\ntarget_interpreter: /usr/bin/env node");
        let target = TargetCommand::from_manifest(&m, Path::new("/b"), Path::new("/s")).unwrap();
        assert_eq!(target.interpreter, vec!["/usr/bin/env", "node"]);
    }

    #[test]
    fn test_locate_relative_artifact() {
        let staging = TempDir::new().unwrap();
        fs::create_dir_all(staging.path().join("out")).unwrap();
        fs::write(staging.path().join("out/app"), b"bin").unwrap();
        let entry = Path::new("/cache/entries/abc");

        let m = manifest("target_bin: ./out/app");
        let target = TargetCommand::from_manifest(&m, entry, Path::new("/s")).unwrap();
        let artifact = target.locate_artifact(staging.path(), entry).unwrap();
        assert_eq!(artifact, PathBuf::from("/cache/entries/abc/out/app"));
    }

    #[test]
    fn test_locate_build_dir_placeholder_maps_to_staging() {
        let staging = TempDir::new().unwrap();
        fs::write(staging.path().join("app"), b"bin").unwrap();
        let entry = Path::new("/cache/entries/abc");

        let m = manifest("target_bin: \"@@@/app\"");
        let target = TargetCommand::from_manifest(&m, entry, Path::new("/s")).unwrap();
        assert_eq!(
            target.locate_artifact(staging.path(), entry).unwrap(),
            PathBuf::from("/cache/entries/abc/app")
        );
    }

    #[test]
    fn test_locate_missing_artifact() {
        let staging = TempDir::new().unwrap();
        let entry = Path::new("/cache/entries/abc");
        let target = TargetCommand::from_manifest(&manifest(""), entry, Path::new("/s")).unwrap();
        let err = target.locate_artifact(staging.path(), entry).unwrap_err();
        assert!(matches!(err, BuildFailure::MissingArtifact { path } if path.ends_with("script")));
    }

    #[test]
    fn test_locate_external_absolute_artifact() {
        let outside = TempDir::new().unwrap();
        let bin = outside.path().join("out");
        fs::write(&bin, b"bin").unwrap();
        let staging = TempDir::new().unwrap();

        let m = manifest(&format!("target_bin: {}", bin.display()));
        let target = TargetCommand::from_manifest(&m, Path::new("/cache/e"), Path::new("/s")).unwrap();
        assert_eq!(target.locate_artifact(staging.path(), Path::new("/cache/e")).unwrap(), bin);
    }

    #[cfg(unix)]
    #[test]
    fn test_bare_program_falls_back_to_path() {
        let staging = TempDir::new().unwrap();
        let m = manifest("target_bin: sh script.sh");
        let target = TargetCommand::from_manifest(&m, Path::new("/cache/e"), Path::new("/s")).unwrap();
        let artifact = target.locate_artifact(staging.path(), Path::new("/cache/e")).unwrap();
        assert!(artifact.is_absolute());
        assert!(artifact.ends_with("sh"));
    }

    #[test]
    fn test_resolve_installed_per_script_dir() {
        let build = TempDir::new().unwrap();
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        fs::write(a.path().join("helper"), b"a").unwrap();
        fs::write(b.path().join("helper"), b"b").unwrap();

        let m = manifest("target_bin: \"{script_dir}/helper --root {script_dir}\"");
        for dir in [a.path(), b.path()] {
            let target = TargetCommand::from_manifest(&m, build.path(), dir).unwrap();
            assert_eq!(target.resolve_installed(build.path()), Some(dir.join("helper")));
            assert_eq!(target.args, vec!["--root".to_string(), dir.display().to_string()]);
        }

        fs::remove_file(b.path().join("helper")).unwrap();
        let target = TargetCommand::from_manifest(&m, build.path(), b.path()).unwrap();
        assert_eq!(target.resolve_installed(build.path()), None);
    }

    #[test]
    fn test_resolve_installed_in_build_dir() {
        let build = TempDir::new().unwrap();
        fs::create_dir_all(build.path().join("out")).unwrap();
        fs::write(build.path().join("out/app"), b"bin").unwrap();

        let m = manifest("target_bin: ./out/app");
        let target = TargetCommand::from_manifest(&m, build.path(), Path::new("/s")).unwrap();
        assert_eq!(target.resolve_installed(build.path()), Some(build.path().join("out/app")));

        let target = TargetCommand::from_manifest(&manifest(""), build.path(), Path::new("/s")).unwrap();
        assert_eq!(target.resolve_installed(build.path()), None);
    }
}
