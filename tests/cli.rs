use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

struct Invocation {
    tmp: TempDir,
    out: TempDir,
}

impl Invocation {
    fn new() -> Self {
        Invocation {
            tmp: TempDir::new().unwrap(),
            out: TempDir::new().unwrap(),
        }
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_oci-fetch"))
            .args(args)
            .current_dir(self.out.path())
            .env("TMPDIR", self.tmp.path())
            .env_remove("RUST_LOG")
            .env_remove("HTTP_PROXY")
            .env_remove("http_proxy")
            .env_remove("HTTPS_PROXY")
            .env_remove("https_proxy")
            .env_remove("ALL_PROXY")
            .env_remove("all_proxy")
            .output()
            .unwrap()
    }

    fn is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    fn left_nothing_behind(&self) -> bool {
        Self::is_empty(self.tmp.path()) && Self::is_empty(self.out.path())
    }
}

#[test]
fn no_arguments_prints_usage() {
    let inv = Invocation::new();
    let output = inv.run(&[]);

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"), "stdout was {stdout:?}");
    assert!(inv.left_nothing_behind());
}

#[test]
fn three_arguments_prints_usage() {
    let inv = Invocation::new();
    let output = inv.run(&["docker://quay.io/coreos/etcd", "etcd.oci", "extra"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Usage:"));
    assert!(inv.left_nothing_behind());
}

#[test]
fn malformed_reference_is_rejected_before_any_io() {
    let inv = Invocation::new();
    let output = inv.run(&["not-a-valid-ref", "out.oci"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid image reference"), "stderr was {stderr:?}");
    assert_eq!(stderr.lines().count(), 1);
    assert!(inv.left_nothing_behind());
}

#[test]
fn fetch_failure_cleans_up_scratch_dir() {
    let inv = Invocation::new();
    // Nothing listens on port 1, so the very first request fails.
    let output = inv.run(&[
        "--insecure-allow-http",
        "docker://127.0.0.1:1/team/app:v1",
        "app.oci",
    ]);

    assert_eq!(output.status.code(), Some(1));
    assert!(!output.stderr.is_empty());
    assert!(inv.left_nothing_behind());
}

#[test]
fn unknown_flag_exits_with_failure() {
    let inv = Invocation::new();
    let output = inv.run(&["--no-such-flag", "docker://quay.io/coreos/etcd", "etcd.oci"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(inv.left_nothing_behind());
}

#[test]
fn help_exits_cleanly() {
    let inv = Invocation::new();
    let output = inv.run(&["--help"]);

    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("--insecure-skip-tls-verification"));
}
