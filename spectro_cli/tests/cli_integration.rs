use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Minimal valid config for the simulator backend
fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[device]
eeprom_protocol = "usb"
compatibility = "native"

[acquisition]
min_readout_ms = 100
mode = "standard"

[retry]
# keep fault cases fast
max_retries = 2
backoff_base_ms = 1
throwaway_multiplier = 1

[timeouts]
transport_ms = 50
gate_ms = 150
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["acquire", "--integration-ms", "5"], 0, "Acquired 1952 pixels", "stdout")]
#[case(&["acquire", "--integration-ms", "5", "--scans", "3"], 0, "3 exposure(s)", "stdout")]
#[case(&["acquire", "--mode", "auto-dark", "--laser"], 1, "--laser only applies", "stderr")]
#[case(&["acquire", "--roi", "10"], 2, "--roi", "stderr")]
#[case(&["eeprom"], 0, "Serial:       SIM0001", "stdout")]
#[case(&["self-check"], 0, "Self-check OK", "stdout")]
#[case(&["calibrate"], 2, "unrecognized subcommand", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("spectro").unwrap();
    cmd.env_remove("SPECTRO_SIM_FAULT");
    cmd.arg("--config").arg(&cfg).args(args);

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => assert.stdout(predicate::str::contains(needle)),
        _ => assert.stderr(predicate::str::contains(needle)),
    };
}

#[rstest]
fn defaults_apply_without_a_config_file() {
    let mut cmd = Command::cargo_bin("spectro").unwrap();
    cmd.env_remove("SPECTRO_SIM_FAULT");
    cmd.args(["eeprom"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Model:        WP-785X-SIM"));
}

#[rstest]
#[case("[acquisition]\nmin_readout_ms = 0\n", "min_readout_ms must be >= 1")]
#[case("[timeouts]\ngate_ms = 0\n", "timeouts.gate_ms must be >= 1")]
#[case("[logging]\nrotation = \"weekly\"\n", "logging.rotation must be one of")]
#[case("[device]\neeprom_protocol = \"serial\"\n", "not valid TOML for this tool")]
fn invalid_config_is_explained(#[case] toml: &str, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("bad.toml");
    fs::write(&cfg, toml).unwrap();

    let mut cmd = Command::cargo_bin("spectro").unwrap();
    cmd.arg("--config").arg(&cfg).arg("eeprom");
    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains(needle))
        .stdout(predicate::str::is_empty());
}

#[rstest]
fn missing_config_file_is_reported() {
    let dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("spectro").unwrap();
    cmd.arg("--config")
        .arg(dir.path().join("nope.toml"))
        .arg("eeprom");
    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("reading config"));
}

#[rstest]
fn file_logging_writes_json_lines() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("spectro.log");
    let toml = format!(
        "[logging]\nfile = {:?}\nlevel = \"info\"\nrotation = \"never\"\n",
        log.display().to_string()
    );
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, toml).unwrap();

    let mut cmd = Command::cargo_bin("spectro").unwrap();
    cmd.env_remove("SPECTRO_SIM_FAULT");
    cmd.arg("--config").arg(&cfg).arg("eeprom");
    cmd.assert().success();

    let text = fs::read_to_string(&log).unwrap();
    let first = text.lines().next().expect("at least one log line");
    let v: serde_json::Value = serde_json::from_str(first).unwrap();
    assert!(v.get("level").is_some());
    assert!(text.contains("connected"));
}
