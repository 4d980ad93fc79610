// Common test utilities shared across acceptance tests
//
// ## Test Isolation Strategy
//
// Every test gets its own workspace (scripts) and cache directory, both
// temporary. The binary is pointed at the cache through SCRIPTBIN_CACHE_DIR
// and at an empty XDG config home, so a developer's own config and cache are
// never touched and tests can run in parallel.

#![allow(dead_code)]

use assert_cmd::Command;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub fn scriptbin_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_scriptbin"))
}

/// Isolated scripts directory plus cache directory
pub struct TestWorkspace {
    temp_dir: TempDir,
    cache_dir: TempDir,
    fixtures_dir: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let project_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        Self {
            temp_dir: TempDir::new().unwrap(),
            cache_dir: TempDir::new().unwrap(),
            fixtures_dir: project_root.join("fixtures/scripts"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn cache_path(&self) -> &Path {
        self.cache_dir.path()
    }

    /// `scriptbin` with this workspace's cache and no user config
    pub fn scriptbin(&self) -> Command {
        self.isolated(scriptbin_bin())
    }

    /// Run a script directly through its shebang, with `scriptbin` on `PATH`
    pub fn shebang(&self, script: &Path) -> Command {
        let bin_dir = scriptbin_bin().parent().unwrap().to_path_buf();
        let mut paths = vec![bin_dir];
        if let Some(existing) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        let mut cmd = self.isolated(script);
        cmd.env("PATH", std::env::join_paths(paths).unwrap());
        cmd
    }

    fn isolated(&self, program: impl AsRef<OsStr>) -> Command {
        let mut cmd = Command::new(program);
        cmd.env("SCRIPTBIN_CACHE_DIR", self.cache_path())
            .env("XDG_CONFIG_HOME", self.path().join("xdg-config"))
            .env_remove("SCRIPTBIN_CONFIG")
            .env_remove("SCRIPTBIN_BUILD")
            .env_remove("SCRIPTBIN_BUILD_TIMEOUT")
            .env_remove("SCRIPTBIN_SHOW_BUILD_LOGS")
            .env_remove("SCRIPTBIN_LOG")
            .current_dir(self.path());
        cmd
    }

    /// Copy a fixture script into the workspace
    pub fn copy_script(&self, name: &str) -> PathBuf {
        let dest = self.path().join(name);
        fs::copy(self.fixtures_dir.join(name), &dest).unwrap();
        make_executable(&dest);
        dest
    }

    /// Write a shell script with a manifest block
    ///
    /// `manifest` lines are written as-is after the `# ` comment prefix.
    pub fn write_script(&self, name: &str, manifest: &[&str], body: &str) -> PathBuf {
        let mut text = String::from("#!/usr/bin/env scriptbin\n# scriptbin-begin\n");
        for line in manifest {
            text.push_str("# ");
            text.push_str(line);
            text.push('\n');
        }
        text.push_str("# scriptbin-end\n");
        text.push_str(body);

        let dest = self.path().join(name);
        fs::write(&dest, text).unwrap();
        make_executable(&dest);
        dest
    }

    /// File the counting build command appends to on every build
    pub fn build_counter(&self) -> PathBuf {
        self.path().join("build-count")
    }

    /// Build command that records itself, then installs `main.sh` as `./script`
    pub fn counting_build_cmd(&self) -> String {
        format!(
            "echo built >> {} && cp main.sh script && chmod +x script",
            self.build_counter().display()
        )
    }

    pub fn build_count(&self) -> usize {
        fs::read_to_string(self.build_counter())
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    /// Config file pointing `[docker] binary` at a stand-in engine
    ///
    /// The stand-in appends each subcommand to `docker.log`. `build` and `rmi`
    /// do nothing and `run` executes the step on the host in the mounted dir.
    pub fn fake_docker_config(&self) -> PathBuf {
        let engine = self.path().join("fake-docker");
        let script = format!(
            r#"#!/bin/sh
echo "$1" >> "{log}"
if [ "$1" = "run" ]; then
  shift
  while [ "$1" != "sh" ]; do
    if [ "$1" = "-v" ]; then shift; src="${{1%%:*}}"; fi
    shift
  done
  cd "$src" && exec sh -c "$3"
fi
exit 0
"#,
            log = self.docker_log().display()
        );
        fs::write(&engine, script).unwrap();
        make_executable(&engine);

        let config = self.path().join("docker.toml");
        fs::write(
            &config,
            format!("[docker]\nbinary = \"{}\"\nrun_as_current_user = false\n", engine.display()),
        )
        .unwrap();
        config
    }

    pub fn docker_log(&self) -> PathBuf {
        self.path().join("docker.log")
    }

    /// Subcommands the stand-in engine received, in order
    pub fn docker_calls(&self) -> Vec<String> {
        fs::read_to_string(self.docker_log())
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Number of committed cache entries
    pub fn entry_count(&self) -> usize {
        fs::read_dir(self.cache_path().join("entries"))
            .map(|dir| dir.count())
            .unwrap_or(0)
    }
}

fn make_executable(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).unwrap();
    }
}
