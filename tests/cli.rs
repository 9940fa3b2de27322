//! End-to-end CLI surface tests (§6, `cli/parser.rs`).
//!
//! Exercises the compiled `orchestrator-server` binary rather than calling
//! into `clap` directly, so a regression in argument wiring (renamed flag,
//! dropped subcommand) is caught the way a user invoking the binary would
//! hit it.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_the_serve_subcommand() {
    Command::cargo_bin("orchestrator-server")
        .expect("binary should build")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn serve_help_documents_bind_and_store_path_flags() {
    Command::cargo_bin("orchestrator-server")
        .expect("binary should build")
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--bind"))
        .stdout(predicate::str::contains("--store-path"));
}

#[test]
fn unknown_subcommand_fails_with_usage() {
    Command::cargo_bin("orchestrator-server")
        .expect("binary should build")
        .arg("not-a-real-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}
