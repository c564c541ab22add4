//! Integration tests for the `areawatch` CLI binary.
//!
//! These cover argument parsing, help output, shell completions and the
//! errors raised before any connection is attempted. No server needed.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `areawatch` binary with env isolation.
///
/// Clears all `AREAWATCH_*` env vars and points config directories at
/// `home` so tests never touch the user's real configuration.
fn areawatch_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("areawatch");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("AREAWATCH_PROFILE")
        .env_remove("AREAWATCH_ENDPOINT")
        .env_remove("AREAWATCH_TOKEN")
        .env_remove("AREAWATCH_OUTPUT")
        .env_remove("AREAWATCH_LOG_FILE")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = areawatch_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    areawatch_cmd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("search")
                .and(predicate::str::contains("watch"))
                .and(predicate::str::contains("config"))
                .and(predicate::str::contains("completions")),
        );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    areawatch_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("areawatch"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    let home = tempfile::tempdir().unwrap();
    areawatch_cmd(home.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    let home = tempfile::tempdir().unwrap();
    areawatch_cmd(home.path())
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Argument errors ─────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let home = tempfile::tempdir().unwrap();
    let output = areawatch_cmd(home.path()).arg("foobar").output().unwrap();
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(
        text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_search_requires_a_term() {
    let home = tempfile::tempdir().unwrap();
    areawatch_cmd(home.path())
        .arg("search")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("TERM"));
}

#[test]
fn test_invalid_output_format() {
    let home = tempfile::tempdir().unwrap();
    let output = areawatch_cmd(home.path())
        .args(["--output", "yaml", "search", "Brazil"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(
        text.contains("possible values") || text.contains("invalid value"),
        "Expected error about valid output formats:\n{text}"
    );
}

// ── Errors before connecting ────────────────────────────────────────

#[test]
fn test_search_without_endpoint() {
    let home = tempfile::tempdir().unwrap();
    areawatch_cmd(home.path())
        .args(["--token", "valid-token", "search", "Brazil"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No endpoint configured"));
}

#[test]
fn test_non_websocket_endpoint_rejected() {
    let home = tempfile::tempdir().unwrap();
    areawatch_cmd(home.path())
        .args([
            "--endpoint",
            "http://localhost:4000",
            "--token",
            "valid-token",
            "search",
            "Brazil",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ws://"));
}

#[test]
fn test_unknown_profile_rejected() {
    let home = tempfile::tempdir().unwrap();
    areawatch_cmd(home.path())
        .args(["--profile", "nope", "watch"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("nope"));
}

// ── Config commands ─────────────────────────────────────────────────

#[test]
fn test_config_path_is_under_config_home() {
    let home = tempfile::tempdir().unwrap();
    areawatch_cmd(home.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_show_without_file() {
    let home = tempfile::tempdir().unwrap();
    areawatch_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("default_profile"));
}

#[test]
fn test_config_show_reads_profiles() {
    let home = tempfile::tempdir().unwrap();
    let path = home.path().join(".config/areawatch/config.toml");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        r#"
default_profile = "lab"

[profiles.lab]
endpoint = "ws://lab.local:4000/ws"
token = "do-not-print"
"#,
    )
    .unwrap();

    areawatch_cmd(home.path())
        .args(["--output", "json", "config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("ws://lab.local:4000/ws")
                .and(predicate::str::contains("do-not-print").not()),
        );
}

#[test]
fn test_config_subcommands_exist() {
    let home = tempfile::tempdir().unwrap();
    areawatch_cmd(home.path())
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("init")
                .and(predicate::str::contains("show"))
                .and(predicate::str::contains("path"))
                .and(predicate::str::contains("set-token")),
        );
}
