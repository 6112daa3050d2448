use assert_cmd::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[retry]
max_retries = 2
backoff_base_ms = 1
throwaway_multiplier = 1
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn run_json(args: &[&str]) -> serde_json::Value {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let mut cmd = Command::cargo_bin("spectro").unwrap();
    cmd.env_remove("SPECTRO_SIM_FAULT");
    cmd.arg("--config").arg(&cfg).arg("--json").args(args);
    let out = cmd.output().unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8(out.stdout).unwrap();
    let line = stdout.lines().last().expect("one JSON line on stdout");
    serde_json::from_str(line).unwrap()
}

#[rstest]
fn acquire_json_has_stable_fields() {
    let v = run_json(&["acquire", "--integration-ms", "5", "--gain-db", "12.5", "--scans", "2"]);
    assert_eq!(v["pixels"], 1952);
    assert_eq!(v["integration_time_ms"], 5);
    assert_eq!(v["gain_db"], 12.5);
    assert_eq!(v["scans_to_average"], 2);
    assert_eq!(v["exposures"], 2);
    assert_eq!(v["mode"], "standard");
    assert_eq!(v["laser_enabled"], false);
    assert!(v["mean"].is_number());
    assert!(v["peak"]["pixel"].is_u64());
    assert!(v["peak"]["wavelength_nm"].is_number());
    assert!(v.get("spectrum").is_none());
}

#[rstest]
fn full_acquire_includes_spectrum_and_axis() {
    let v = run_json(&["acquire", "--integration-ms", "5", "--full"]);
    let spectrum = v["spectrum"].as_array().unwrap();
    let axis = v["wavelengths_nm"].as_array().unwrap();
    assert_eq!(spectrum.len(), 1952);
    assert_eq!(axis.len(), 1952);
    assert!(axis[0].as_f64().unwrap() < axis[1951].as_f64().unwrap());
}

#[rstest]
fn integration_time_is_clamped_to_the_device_range() {
    let v = run_json(&["acquire", "--integration-ms", "0"]);
    assert_eq!(v["integration_time_ms"], 1);
}

#[rstest]
fn eeprom_json_mirrors_the_descriptor() {
    let v = run_json(&["eeprom"]);
    assert_eq!(v["model"], "WP-785X-SIM");
    assert_eq!(v["serial_number"], "SIM0001");
    assert_eq!(v["pixel_count"], 1952);
    assert_eq!(v["roi_vert"][0], serde_json::json!([250, 950]));
    assert_eq!(v["has_laser"], true);
    assert_eq!(v["bad_pixels"], serde_json::json!([]));
}

#[rstest]
fn self_check_json_reports_battery_and_interlock() {
    let v = run_json(&["self-check"]);
    assert_eq!(v["ok"], true);
    assert_eq!(v["battery"]["percent"], 87);
    assert_eq!(v["battery"]["charging"], false);
    assert!(v["interlock_closed"].is_boolean());
}
