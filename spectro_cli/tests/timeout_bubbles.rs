use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

const FAST_RETRY: &str = r#"
[retry]
max_retries = 2
backoff_base_ms = 1
throwaway_multiplier = 1

[timeouts]
transport_ms = 20
"#;

#[rstest]
#[case("timeout", 4, "stopped answering")]
#[case("odd-length", 6, "malformed spectrum packets")]
#[case("device-error", 5, "status 0x42")]
#[case("disconnected", 4, "link to the spectrometer failed")]
#[case("blank-eeprom", 3, "page 0 is blank")]
fn simulator_faults_bubble_to_cli(#[case] fault: &str, #[case] code: i32, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, FAST_RETRY).unwrap();

    let mut cmd = Command::cargo_bin("spectro").unwrap();
    cmd.env("SPECTRO_SIM_FAULT", fault);
    cmd.arg("--config")
        .arg(&cfg)
        .args(["acquire", "--integration-ms", "5"]);
    cmd.assert()
        .code(code)
        .stderr(predicate::str::contains("What happened:"))
        .stderr(predicate::str::contains(needle));
}

#[rstest]
#[case("device-error", "DeviceRejected", Some(("status", 0x42)))]
#[case("blank-eeprom", "CalibrationCorrupt", Some(("fill", 0xFF)))]
#[case("odd-length", "ProtocolViolation", None)]
fn json_errors_go_to_stdout(
    #[case] fault: &str,
    #[case] reason: &str,
    #[case] detail: Option<(&str, u64)>,
) {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, FAST_RETRY).unwrap();

    let mut cmd = Command::cargo_bin("spectro").unwrap();
    cmd.env("SPECTRO_SIM_FAULT", fault);
    cmd.arg("--config")
        .arg(&cfg)
        .args(["--json", "acquire", "--integration-ms", "5"]);
    let out = cmd.output().unwrap();
    assert!(!out.status.success());

    let stdout = String::from_utf8(out.stdout).unwrap();
    let line = stdout.lines().last().expect("error JSON on stdout");
    let v: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(v["reason"], reason);
    assert!(v["message"].as_str().unwrap().starts_with("What happened:"));
    if let Some((key, value)) = detail {
        assert_eq!(v["details"][key], value);
    }
}

#[rstest]
fn unknown_fault_name_fails_fast() {
    let mut cmd = Command::cargo_bin("spectro").unwrap();
    cmd.env("SPECTRO_SIM_FAULT", "gremlins");
    cmd.arg("eeprom");
    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("unknown SPECTRO_SIM_FAULT value"));
}
