/// Acceptance tests for `scriptbin cache`
#[cfg(unix)]
mod common;

#[cfg(unix)]
mod unix {
    use super::common::TestWorkspace;
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};

    fn container_script(ws: &TestWorkspace, name: &str, body: &str) -> PathBuf {
        ws.write_script(
            name,
            &[
                "script_src: main.sh",
                "build_cmd: cp main.sh script && chmod +x script",
                "replace_shebang_with: \"#!/bin/sh\"",
                "docker_build:",
                "  dockerfile: \"FROM alpine:3\\n\"",
                "  src_mount_dir: /src",
            ],
            body,
        )
    }

    fn clean(ws: &TestWorkspace, config: &Path, script: &Path) -> assert_cmd::assert::Assert {
        ws.scriptbin()
            .env("SCRIPTBIN_CONFIG", config)
            .args(["cache", "clean"])
            .arg(script)
            .assert()
            .success()
    }

    #[test]
    fn test_info_reports_status() {
        let ws = TestWorkspace::new();
        let script = ws.copy_script("hello.sh");

        ws.scriptbin()
            .args(["cache", "info"])
            .arg(&script)
            .assert()
            .success()
            .stdout(predicate::str::contains("not cached"))
            .stdout(predicate::str::contains("fingerprint:"))
            .stdout(predicate::str::contains("artifact:").not());

        ws.scriptbin().arg(&script).assert().success();

        ws.scriptbin()
            .args(["cache", "info"])
            .arg(&script)
            .assert()
            .success()
            .stdout(predicate::str::contains("cached"))
            .stdout(predicate::str::contains("not cached").not())
            .stdout(predicate::str::contains("artifact:"))
            .stdout(predicate::str::contains("build_ms:"));
    }

    #[test]
    fn test_get_prints_single_item() {
        let ws = TestWorkspace::new();
        let script = ws.copy_script("hello.sh");
        ws.scriptbin().arg(&script).assert().success();

        let output = ws
            .scriptbin()
            .args(["cache", "get", "artifact"])
            .arg(&script)
            .output()
            .unwrap();
        assert!(output.status.success());
        let artifact = PathBuf::from(String::from_utf8(output.stdout).unwrap().trim());
        assert!(artifact.is_file());
        assert!(artifact.starts_with(ws.cache_path()));

        ws.scriptbin()
            .args(["cache", "get", "cache_path"])
            .arg(&script)
            .assert()
            .success()
            .stdout(predicate::str::starts_with(
                ws.cache_path().display().to_string(),
            ));
    }

    #[test]
    fn test_get_unknown_item_lists_available() {
        let ws = TestWorkspace::new();
        let script = ws.copy_script("hello.sh");

        ws.scriptbin()
            .args(["cache", "get", "bogus"])
            .arg(&script)
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Available items"))
            .stderr(predicate::str::contains("fingerprint"));
    }

    #[test]
    fn test_clean_removes_entry() {
        let ws = TestWorkspace::new();
        let script = ws.copy_script("hello.sh");
        ws.scriptbin().arg(&script).assert().success();
        assert_eq!(ws.entry_count(), 1);

        ws.scriptbin()
            .args(["cache", "clean"])
            .arg(&script)
            .assert()
            .success()
            .stderr(predicate::str::contains("Removed cache entry"));
        assert_eq!(ws.entry_count(), 0);

        ws.scriptbin()
            .args(["cache", "clear"])
            .arg(&script)
            .assert()
            .success()
            .stderr(predicate::str::contains("No cache entry"));
    }

    #[test]
    fn test_list_shows_entries() {
        let ws = TestWorkspace::new();
        let script = ws.copy_script("hello.sh");

        ws.scriptbin()
            .args(["cache", "list"])
            .assert()
            .success()
            .stderr(predicate::str::contains("Cache is empty"));

        ws.scriptbin().arg(&script).assert().success();

        ws.scriptbin()
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("hello.sh"))
            .stderr(predicate::str::contains("1 entries"));
    }

    #[test]
    fn test_gc_removes_old_entries() {
        let ws = TestWorkspace::new();
        let script = ws.copy_script("hello.sh");
        ws.scriptbin().arg(&script).assert().success();

        ws.scriptbin()
            .args(["cache", "gc"])
            .assert()
            .success()
            .stderr(predicate::str::contains("Removed 0 entries"));
        assert_eq!(ws.entry_count(), 1);

        std::thread::sleep(std::time::Duration::from_millis(20));
        ws.scriptbin()
            .args(["cache", "gc", "--older-than", "0s"])
            .assert()
            .success()
            .stderr(predicate::str::contains("Removed 1 entries"));
        assert_eq!(ws.entry_count(), 0);
    }

    #[test]
    fn test_gc_rejects_bad_age() {
        let ws = TestWorkspace::new();
        ws.scriptbin()
            .args(["cache", "gc", "--older-than", "soon"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("--older-than"));
    }

    #[test]
    fn test_info_names_container_image() {
        let ws = TestWorkspace::new();
        let script = ws.copy_script("docker_rust.rs");

        ws.scriptbin()
            .args(["cache", "info"])
            .arg(&script)
            .assert()
            .success()
            .stdout(predicate::str::contains("docker_image:"))
            .stdout(predicate::str::contains("scriptbin-"));
    }

    #[test]
    fn test_clean_keeps_image_shared_with_other_entries() {
        let ws = TestWorkspace::new();
        let config = ws.fake_docker_config();
        let first = container_script(&ws, "first", "echo first\n");
        let second = container_script(&ws, "second", "echo second\n");

        for (script, out) in [(&first, "first\n"), (&second, "second\n")] {
            ws.scriptbin()
                .env("SCRIPTBIN_CONFIG", &config)
                .arg(script)
                .assert()
                .success()
                .stdout(out);
        }
        assert_eq!(ws.entry_count(), 2);

        clean(&ws, &config, &first)
            .stderr(predicate::str::contains("Removed cache entry"))
            .stderr(predicate::str::contains("Keeping image scriptbin-"));
        assert!(!ws.docker_calls().contains(&"rmi".to_string()));

        clean(&ws, &config, &second).stderr(predicate::str::contains("Removed image scriptbin-"));
        assert_eq!(ws.docker_calls().last().map(String::as_str), Some("rmi"));
        assert_eq!(ws.entry_count(), 0);
    }
}
