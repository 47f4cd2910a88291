//! CLI integration tests
//!
//! These tests verify the command-line interface behavior, including:
//! - Command parsing and validation
//! - Stage dispatch and exit codes
//! - The stdout contract of the unique-id stage

use std::env;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

/// Helper to get the path to the modelops binary
fn modelops_bin() -> PathBuf {
    // In tests, the binary should be at target/debug/modelops
    let mut path = env::current_exe()
        .expect("Failed to get current executable path")
        .parent()
        .expect("No parent")
        .parent()
        .expect("No parent")
        .to_path_buf();

    // If we're in deps/, go up one more level
    if path.ends_with("deps") {
        path = path.parent().expect("No parent").to_path_buf();
    }

    path.join("modelops")
}

/// Helper to run the binary inside a scratch working directory with a
/// local storage backend, so no stage reaches for the network
fn modelops_in(dir: &TempDir) -> Command {
    let mut cmd = Command::new(modelops_bin());
    cmd.current_dir(dir.path());
    cmd.env(
        "MODELOPS_STORAGE_URL",
        format!("file://{}", dir.path().join("store").display()),
    );
    cmd
}

#[test]
fn test_cli_help() {
    let output = Command::new(modelops_bin())
        .arg("--help")
        .output()
        .expect("Failed to execute modelops");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("modelops"));
    assert!(stdout.contains("fetch-executables"));
    assert!(stdout.contains("unique-id"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("result-upload"));
}

#[test]
fn test_cli_version() {
    let output = Command::new(modelops_bin())
        .arg("--version")
        .output()
        .expect("Failed to execute modelops");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("modelops"));
}

#[test]
fn test_run_help() {
    let output = Command::new(modelops_bin())
        .arg("run")
        .arg("--help")
        .output()
        .expect("Failed to execute modelops");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("MODEL_NAME") || stdout.contains("model_name"));
    assert!(stdout.contains("QUEUE") || stdout.contains("queue"));
    assert!(stdout.contains("CORE_COUNT") || stdout.contains("core_count"));
}

#[test]
fn test_fetch_inputs_help() {
    let output = Command::new(modelops_bin())
        .arg("fetch-inputs")
        .arg("--help")
        .output()
        .expect("Failed to execute modelops");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--parent-path"));
    assert!(stdout.contains("--delete"));
}

#[test]
fn test_missing_model_name() {
    let output = Command::new(modelops_bin())
        .arg("preprocess")
        .output()
        .expect("Failed to execute modelops");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("required") || stderr.contains("MODEL_NAME"));
}

#[test]
fn test_unknown_subcommand() {
    let output = Command::new(modelops_bin())
        .arg("simulate")
        .output()
        .expect("Failed to execute modelops");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unrecognized") || stderr.contains("invalid"));
}

#[test]
fn test_quiet_conflicts_with_verbose() {
    let output = Command::new(modelops_bin())
        .arg("-q")
        .arg("-v")
        .arg("postprocess")
        .arg("decomp")
        .output()
        .expect("Failed to execute modelops");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot be used with") || stderr.contains("conflicts"));
}

#[test]
fn test_unknown_model_exits_nonzero() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let output = modelops_in(&temp_dir)
        .arg("execution-status")
        .arg("prospec")
        .arg("--job-id")
        .arg("1234")
        .output()
        .expect("Failed to execute modelops");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Stage failed"));
}

#[test]
fn test_unique_id_prints_fingerprint() {
    // An empty working directory hashes to a fingerprint that depends only
    // on the model name, version and parent id
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let output = modelops_in(&temp_dir)
        .arg("unique-id")
        .arg("decomp")
        .arg("1.0")
        .arg("--parent-id")
        .arg("parent-id")
        .output()
        .expect("Failed to execute modelops");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("cc4306b33a27a796620b8e145c95bc67"));
    assert!(temp_dir.path().join("id.modelops").exists());
    assert!(temp_dir.path().join("metadata.modelops").exists());
}

#[test]
fn test_log_level_flag() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let output = modelops_in(&temp_dir)
        .arg("--log-level")
        .arg("debug")
        .arg("unique-id")
        .arg("decomp")
        .arg("1.0")
        .output()
        .expect("Failed to execute modelops");

    assert!(output.status.success());
}
