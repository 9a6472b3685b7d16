//! Integration tests for core CLI contract behavior.

use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("etxota");
    cmd.env_remove("ETXOTA_PORT")
        .env_remove("ETXOTA_BAUD")
        .env_remove("ETXOTA_NON_INTERACTIVE")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("etxota"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("etxota"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn list_ports_json_returns_valid_json() {
    let dir = tempdir().expect("tempdir should be created");
    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    assert!(
        output
            .status
            .success()
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("stdout should be valid JSON");
    assert!(parsed.is_array(), "should be a JSON array");
}

#[test]
fn info_json_describes_image() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = dir
        .path()
        .join("app.bin");
    fs::write(&firmware, b"123456789").expect("write firmware");

    let output = cli_cmd()
        .current_dir(dir.path())
        .arg("info")
        .arg("--json")
        .arg(&firmware)
        .output()
        .expect("command should execute");
    assert!(
        output
            .status
            .success()
    );

    let info: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be valid JSON");
    assert_eq!(info["size"], 9);
    assert_eq!(info["crc"], "0x29B1");
    assert_eq!(info["chunks"], 1);
    assert_eq!(info["fw_type"], "app");
    assert_eq!(info["version"], "0x3A67");
    assert_eq!(
        info["info_packet"],
        "2A 02 09 00 09 00 00 00 01 B1 29 67 3A CF 0A 23"
    );
}

#[test]
fn info_json_honors_type_and_version() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = dir
        .path()
        .join("boot.bin");
    fs::write(&firmware, [0u8; 300]).expect("write firmware");

    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["info", "--json", "--fw-type", "bootloader", "--fw-version", "0x0102"])
        .arg(&firmware)
        .output()
        .expect("command should execute");
    assert!(
        output
            .status
            .success()
    );

    let info: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be valid JSON");
    assert_eq!(info["chunks"], 3);
    assert_eq!(info["fw_type"], "bootloader");
    assert_eq!(info["version"], "0x0102");
}

#[test]
fn info_json_error_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir
        .path()
        .join("not_exists.bin");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("info")
        .arg("--json")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

// ============================================================================
// Exit Code Tests
// ============================================================================

/// Exit code 0: successful operations
#[test]
fn exit_code_zero_on_success() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .code(0);

    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .code(0);
}

/// Exit code 1: generic error fallback
#[test]
fn exit_code_one_for_missing_firmware() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir
        .path()
        .join("does_not_exist.bin");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("info")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .code(1);
}

/// Exit code 2: usage error (unknown command, invalid arguments)
#[test]
fn exit_code_two_for_usage_error_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_firmware_argument() {
    let mut cmd = cli_cmd();
    cmd.arg("flash")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("FIRMWARE"));
}

#[test]
fn exit_code_two_for_invalid_fw_version() {
    let mut cmd = cli_cmd();
    cmd.args(["flash", "app.bin", "--fw-version", "xyz"])
        .assert()
        .failure()
        .code(2);
}

/// Exit code 3: configuration error
#[test]
fn exit_code_three_for_invalid_config_flag() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir
        .path()
        .join("broken.toml");
    fs::write(&config, "invalid toml [[[").expect("write invalid config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("list-ports")
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("config"));
}

#[test]
fn invalid_local_config_only_warns() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path()
            .join("etxota.toml"),
        "invalid toml [[[",
    )
    .expect("write invalid config");

    let output = cli_cmd()
        .current_dir(dir.path())
        .arg("list-ports")
        .output()
        .expect("command should execute");
    assert!(
        output
            .status
            .success(),
        "command should succeed despite config warning"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

/// Exit code 4: device not found
#[test]
fn exit_code_four_for_missing_port() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = dir
        .path()
        .join("app.bin");
    fs::write(&firmware, [0xAAu8; 16]).expect("write firmware");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("-p")
        .arg("INVALID_PORT_NAME_XYZ")
        .arg("flash")
        .arg(&firmware)
        .assert()
        .failure()
        .code(4)
        .stdout(predicate::str::is_empty());
}

// ============================================================================
// stdout/stderr Separation Tests
// ============================================================================

#[test]
fn completions_command_writes_to_stdout() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty())
        .stdout(predicate::str::contains("_etxota()"));
}

#[test]
fn unknown_flag_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("list-ports")
        .arg("--jason")
        .assert()
        .failure()
        .stderr(predicate::str::contains("json").or(predicate::str::contains("did you mean")));
}

#[test]
fn option_terminator_allows_dash_prefixed_operand() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path()
            .join("-odd.bin"),
        [1u8, 2, 3],
    )
    .expect("write firmware");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["info", "--json", "--", "-odd.bin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"size\": 3"));
}
