//! CLI integration tests for mongo-mysql-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! exit codes for error conditions, and offline commands (plan, dry run
//! against a directory of exports).

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::TempDir;

/// Get a command for the mongo-mysql-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("mongo-mysql-migrate").unwrap()
}

/// Config reading `mongoexport` files from `dir`; the target is never contacted
/// by the commands that use it.
fn json_dir_config(dir: &TempDir, extra: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
source:
  type: json_dir
  path: {}
target:
  host: 127.0.0.1
  port: 1
  database: qlmt
  user: root
migration:
  batch_size: 10
{}
"#,
        dir.path().display(),
        extra
    )
    .unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("plan"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--batch-size"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mongo-mysql-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_exist() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--progress"))
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_short_config_flag() {
    cmd()
        .args(["-c", "some_config.yaml", "--help"])
        .assert()
        .success();
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(1);
}

#[test]
fn test_unknown_source_type_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:").unwrap();
    writeln!(file, "  type: couchdb").unwrap();
    writeln!(file, "target:").unwrap();
    writeln!(file, "  host: localhost").unwrap();
    writeln!(file, "  database: qlmt").unwrap();
    writeln!(file, "  user: root").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(1);
}

#[test]
fn test_dependency_cycle_exits_with_code_1() {
    let dir = TempDir::new().unwrap();
    let config = json_dir_config(
        &dir,
        "  entities:\n    - entity: account\n      depends_on: [company]\n    - entity: company",
    );

    cmd()
        .args(["--config", config.path().to_str().unwrap(), "plan"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cycle"));
}

#[test]
fn test_unreachable_target_exits_with_code_2() {
    let dir = TempDir::new().unwrap();
    let config = json_dir_config(&dir, "");

    cmd()
        .args(["--config", config.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2);
}

// =============================================================================
// Offline Commands
// =============================================================================

#[test]
fn test_plan_lists_dependency_order() {
    let dir = TempDir::new().unwrap();
    let config = json_dir_config(
        &dir,
        "  entities:\n    - entity: company\n    - entity: account",
    );

    cmd()
        .args(["--config", config.path().to_str().unwrap(), "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1. account"))
        .stdout(predicate::str::contains("2. company"));
}

#[test]
fn test_dry_run_with_dropped_record_exits_with_code_5() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("accounts.json"),
        "{\"_id\":{\"$oid\":\"a1\"},\"username\":\"alice\"}\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("companies.json"),
        "{\"_id\":\"c1\",\"account\":{\"$oid\":\"a1\"}}\n{\"_id\":\"c2\",\"account\":{\"$oid\":\"gone\"}}\n",
    )
    .unwrap();
    let config = json_dir_config(
        &dir,
        "  entities:\n    - entity: account\n    - entity: company",
    );

    cmd()
        .args([
            "--config",
            config.path().to_str().unwrap(),
            "--output-json",
            "run",
            "--dry-run",
        ])
        .assert()
        .code(5)
        .stdout(predicate::str::contains("\"status\": \"partial\""))
        .stdout(predicate::str::contains("\"records_written\": 2"))
        .stdout(predicate::str::contains("\"records_dropped\": 1"));
}

#[test]
fn test_dry_run_progress_goes_to_stderr() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("accounts.json"),
        "[{\"_id\":\"a1\"},{\"_id\":\"a2\"}]",
    )
    .unwrap();
    let config = json_dir_config(&dir, "  entities:\n    - entity: account");

    cmd()
        .args([
            "--config",
            config.path().to_str().unwrap(),
            "--progress",
            "run",
            "--dry-run",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("\"percent\":100.0"))
        .stdout(predicate::str::contains("Dry run finished"));
}
