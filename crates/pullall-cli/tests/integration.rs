#![allow(deprecated)]
#![cfg(unix)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Stand-in for `git`: fails in directories holding `.fail`, hangs in
/// directories holding `.slow`, otherwise prints its directory and args.
const FAKE_GIT: &str = r#"#!/bin/sh
name=$(basename "$PWD")
if [ -f .fail ]; then
    echo "fatal: could not read from remote repository ($name)" >&2
    exit 1
fi
if [ -f .slow ]; then
    exec sleep 30
fi
echo "Already up to date. $name $*"
"#;

struct Fixture {
    root: TempDir,
    bin: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
            bin: TempDir::new().unwrap(),
        }
    }

    fn checkout(&self, name: &str) -> PathBuf {
        let path = self.root.path().join(name);
        std::fs::create_dir_all(path.join(".git")).unwrap();
        path
    }

    fn fake_git(&self, script: &str) -> PathBuf {
        let path = self.bin.path().join("git");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn pullall(&self, git: &Path) -> Command {
        let mut cmd = Command::cargo_bin("pullall").unwrap();
        cmd.arg(self.root.path())
            .arg("--git")
            .arg(git)
            .env_remove("PULLALL_JOBS")
            .env_remove("PULLALL_GIT")
            .timeout(Duration::from_secs(60));
        cmd
    }
}

// ---------------------------------------------------------------------------
// argument handling
// ---------------------------------------------------------------------------

#[test]
fn missing_root_argument_fails() {
    Command::cargo_bin("pullall")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn zero_jobs_is_rejected() {
    let fx = Fixture::new();
    let git = fx.fake_git(FAKE_GIT);
    fx.pullall(&git).args(["-j", "0"]).assert().failure();
}

#[test]
fn jobs_can_come_from_the_environment() {
    let fx = Fixture::new();
    fx.checkout("repoA");
    fx.checkout("repoB");
    let git = fx.fake_git(FAKE_GIT);

    fx.pullall(&git)
        .env("PULLALL_JOBS", "1")
        .assert()
        .success()
        .stdout(predicate::str::contains("repoA").and(predicate::str::contains("repoB")));
}

// ---------------------------------------------------------------------------
// refresh behaviour
// ---------------------------------------------------------------------------

#[test]
fn refreshes_checkouts_and_ignores_files() {
    let fx = Fixture::new();
    fx.checkout("repoA");
    fx.checkout("repoB");
    std::fs::write(fx.root.path().join("fileC"), "not a directory").unwrap();
    let git = fx.fake_git(FAKE_GIT);

    fx.pullall(&git)
        .assert()
        .success()
        .stdout(predicate::str::contains("Already up to date. repoA pull -p"))
        .stdout(predicate::str::contains("Already up to date. repoB pull -p"))
        .stdout(predicate::str::contains("fileC").not());
}

#[test]
fn plain_directory_is_skipped_silently() {
    let fx = Fixture::new();
    std::fs::create_dir(fx.root.path().join("plainDir")).unwrap();
    let witness = fx.bin.path().join("ran");
    let git = fx.fake_git(&format!("#!/bin/sh\ntouch {}\n", witness.display()));

    fx.pullall(&git).assert().success().stdout("");
    assert!(!witness.exists(), "refresh tool must not run for non-checkouts");
}

#[test]
fn empty_root_succeeds() {
    let fx = Fixture::new();
    let git = fx.fake_git(FAKE_GIT);
    fx.pullall(&git).assert().success().stdout("");
}

#[test]
fn unreadable_root_fails_before_spawning() {
    let fx = Fixture::new();
    let witness = fx.bin.path().join("ran");
    let git = fx.fake_git(&format!("#!/bin/sh\ntouch {}\n", witness.display()));

    let mut cmd = Command::cargo_bin("pullall").unwrap();
    cmd.arg(fx.root.path().join("does-not-exist"))
        .arg("--git")
        .arg(&git)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read directory"))
        .stderr(predicate::str::contains("does-not-exist"));
    assert!(!witness.exists());
}

#[test]
fn failure_cancels_slow_peer_and_exits_non_zero() {
    let fx = Fixture::new();
    let repo_a = fx.checkout("repoA");
    std::fs::write(repo_a.join(".fail"), "").unwrap();
    let repo_b = fx.checkout("repoB");
    std::fs::write(repo_b.join(".slow"), "").unwrap();
    let git = fx.fake_git(FAKE_GIT);

    let started = Instant::now();
    fx.pullall(&git)
        .assert()
        .failure()
        .stderr(predicate::str::contains("repoA"))
        .stderr(predicate::str::contains("exited with code 1"))
        .stderr(predicate::str::contains("could not read from remote repository (repoA)"));
    assert!(
        started.elapsed() < Duration::from_secs(20),
        "slow peer should have been cancelled, took {:?}",
        started.elapsed()
    );
}

#[test]
fn missing_refresh_tool_fails_each_checkout() {
    let fx = Fixture::new();
    fx.checkout("repoA");

    let mut cmd = Command::cargo_bin("pullall").unwrap();
    cmd.arg(fx.root.path())
        .args(["--git", "__nonexistent_refresh_tool__"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to launch"));
}

#[test]
fn repeated_runs_are_idempotent() {
    let fx = Fixture::new();
    fx.checkout("repoA");
    fx.checkout("repoB");
    let git = fx.fake_git(FAKE_GIT);

    for _ in 0..2 {
        fx.pullall(&git)
            .assert()
            .success()
            .stdout(predicate::str::contains("repoA").and(predicate::str::contains("repoB")));
    }
}
